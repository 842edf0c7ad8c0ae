//! OS mount tool abstraction and the `net use` implementation.
//!
//! # Design
//! - `NetworkDrive` is the seam between the drive-letter manager and the host OS, so
//!   the manager can be exercised without touching real mounts.
//! - `NetUseDrive` shells out with `tokio::process`; children are killed when the
//!   caller's timeout drops the future.
//! - Passwords are passed as arguments but never logged.

use std::collections::BTreeMap;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DriveError, DriveResult};
use crate::net_use::parse_net_use;

/// Letter to remote path, as reported by the OS.
pub type MountTable = BTreeMap<char, String>;

/// Operations on the host's network drive table.
#[async_trait]
pub trait NetworkDrive: Send + Sync {
    /// Map `remote` onto `letter`, optionally with credentials.
    async fn mount(
        &self,
        remote: &str,
        letter: char,
        user_name: Option<&str>,
        password: Option<&str>,
    ) -> DriveResult<()>;

    /// Remove the mapping for `letter`.
    async fn unmount(&self, letter: char) -> DriveResult<()>;

    /// Query the live mount table.
    async fn list(&self) -> DriveResult<MountTable>;

    /// Register a credentialed session for `remote` without assigning a letter.
    async fn connect_session(&self, remote: &str, user_name: &str, password: &str)
    -> DriveResult<()>;

    /// Tear down a credentialed session for `remote`.
    async fn disconnect_session(&self, remote: &str) -> DriveResult<()>;
}

/// [`NetworkDrive`] backed by the Windows `net use` command.
#[derive(Debug, Clone)]
pub struct NetUseDrive {
    program: String,
}

impl Default for NetUseDrive {
    fn default() -> Self {
        Self {
            program: "net".to_string(),
        }
    }
}

impl NetUseDrive {
    /// Use a specific executable instead of `net`.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, operation: &'static str, args: &[String]) -> DriveResult<String> {
        debug!(operation, program = %self.program, "running network drive tool");
        let output = Command::new(&self.program)
            .arg("use")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DriveError::Spawn { operation, source })?;
        into_stdout(operation, &output)
    }
}

fn into_stdout(operation: &'static str, output: &Output) -> DriveResult<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Err(DriveError::Tool { operation, detail })
}

fn drive_arg(letter: char) -> String {
    format!("{letter}:")
}

#[async_trait]
impl NetworkDrive for NetUseDrive {
    async fn mount(
        &self,
        remote: &str,
        letter: char,
        user_name: Option<&str>,
        password: Option<&str>,
    ) -> DriveResult<()> {
        let mut args = vec![drive_arg(letter), remote.to_string()];
        if let Some(user_name) = user_name {
            args.push(format!("/user:{user_name}"));
            if let Some(password) = password {
                args.push(password.to_string());
            }
        }
        args.push("/persistent:no".to_string());
        self.run("mount", &args).await.map(drop)
    }

    async fn unmount(&self, letter: char) -> DriveResult<()> {
        let args = [drive_arg(letter), "/delete".to_string(), "/y".to_string()];
        self.run("unmount", &args).await.map(drop)
    }

    async fn list(&self) -> DriveResult<MountTable> {
        let stdout = self.run("list", &[]).await?;
        Ok(parse_net_use(&stdout)?
            .into_iter()
            .map(|entry| (entry.local.to_ascii_uppercase(), entry.remote))
            .collect())
    }

    async fn connect_session(
        &self,
        remote: &str,
        user_name: &str,
        password: &str,
    ) -> DriveResult<()> {
        let args = [
            remote.to_string(),
            format!("/user:{user_name}"),
            password.to_string(),
        ];
        self.run("connect_session", &args).await.map(drop)
    }

    async fn disconnect_session(&self, remote: &str) -> DriveResult<()> {
        let args = [remote.to_string(), "/d".to_string()];
        self.run("disconnect_session", &args).await.map(drop)
    }
}
