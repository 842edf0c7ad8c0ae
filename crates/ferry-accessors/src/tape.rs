//! Tape archives reached through a clip gateway.
//!
//! # Design
//! - Clips are addressed by guid and/or title within an optional server pool;
//!   the accessor's own `guid`/`title` win over the expectation content.
//! - The gateway is a trait so tests and alternate transports plug in through
//!   [`TapeConnector`]; [`HttpTapeGateway`] speaks the JSON gateway API.
//! - Transfers are clip-level (`get_package_read_info` on the source,
//!   `put_package_info` on the target) and run on the gateway, so a started
//!   copy cannot be aborted. Byte streams are not available.
//! - Clip metadata lives in the archive itself; there are no sidecars.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, ClipContent, ClipVersion, Cronjob,
    PackageContainerExpectation, PackageError, PackageResult, Reason,
};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::AccessorContext;
use crate::handle::{
    HandleContent, PackageAccessor, PackageReadInfo, PackageReadStream, PackageReader,
    PackageVersion, PutPackageHandle, WriteCancellation, flag_check, wrong_type,
};

/// A clip as reported by a tape gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapeClip {
    /// Archive-assigned clip id.
    pub clip_id: u64,
    /// Clip guid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Clip title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Length in frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Clone lineage id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_id: Option<u64>,
}

impl TapeClip {
    /// Version fingerprint of the clip.
    #[must_use]
    pub fn version(&self) -> ClipVersion {
        ClipVersion {
            clip_id: Some(self.clip_id),
            frames: self.frames,
            created: self.created.clone(),
            clone_id: self.clone_id,
        }
    }
}

/// Gateway job copying a clip between archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipCopyRequest {
    /// Gateway holding the source clip.
    pub source_gateway_url: String,
    /// Server pool of the source clip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_server_id: Option<u32>,
    /// Source clip id.
    pub source_clip_id: u64,
    /// Server pool receiving the copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_server_id: Option<u32>,
    /// Identity the copy is stored under.
    pub target: ClipContent,
}

/// Operations a tape gateway exposes.
#[async_trait]
pub trait TapeGateway: Send + Sync {
    /// Check that the gateway answers.
    async fn ping(&self) -> PackageResult<()>;

    /// Look up a clip by guid and/or title.
    async fn find_clip(
        &self,
        server_id: Option<u32>,
        content: &ClipContent,
    ) -> PackageResult<Option<TapeClip>>;

    /// Run a copy job to completion and return the new clip.
    async fn copy_clip(&self, request: &ClipCopyRequest) -> PackageResult<TapeClip>;

    /// Delete a clip; deleting an absent clip succeeds.
    async fn delete_clip(&self, server_id: Option<u32>, clip_id: u64) -> PackageResult<()>;
}

/// Resolves a gateway URL into a client.
pub trait TapeConnector: Send + Sync {
    /// Gateway client for `gateway_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for an unusable URL.
    fn connect(&self, gateway_url: &str) -> PackageResult<Arc<dyn TapeGateway>>;
}

/// Connector producing [`HttpTapeGateway`] clients that share one HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTapeConnector {
    client: Client,
}

impl HttpTapeConnector {
    /// Connector sharing `client`.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

impl TapeConnector for HttpTapeConnector {
    fn connect(&self, gateway_url: &str) -> PackageResult<Arc<dyn TapeGateway>> {
        Ok(Arc::new(HttpTapeGateway::new(self.client.clone(), gateway_url)?))
    }
}

/// JSON gateway client.
///
/// `GET /ping`, `GET /clips?serverId&guid&title`, `POST /clips/copy` and
/// `DELETE /clips/{clipId}?serverId`.
#[derive(Debug, Clone)]
pub struct HttpTapeGateway {
    client: Client,
    base: Url,
}

impl HttpTapeGateway {
    /// Client for the gateway at `gateway_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] when the URL does not parse.
    pub fn new(client: Client, gateway_url: &str) -> PackageResult<Self> {
        let normalized = format!("{}/", gateway_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|_| {
            PackageError::config("gatewayUrl", "is not a valid URL", Some(gateway_url.to_string()))
        })?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> PackageResult<Url> {
        self.base
            .join(path)
            .map_err(|_| PackageError::config("gatewayUrl", "cannot address endpoint", Some(path.to_string())))
    }

    async fn send(
        &self,
        operation: &'static str,
        url: &Url,
        request: reqwest::RequestBuilder,
    ) -> PackageResult<reqwest::Response> {
        request.send().await.map_err(|err| PackageError::Http {
            operation,
            url: url.to_string(),
            status: err.status().map(|status| status.as_u16()),
            detail: err.to_string(),
        })
    }

    fn rejected(operation: &'static str, url: &Url, status: StatusCode) -> PackageError {
        PackageError::Http {
            operation,
            url: url.to_string(),
            status: Some(status.as_u16()),
            detail: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }

    async fn clip_body(
        operation: &'static str,
        url: &Url,
        response: reqwest::Response,
    ) -> PackageResult<TapeClip> {
        let bytes = response.bytes().await.map_err(|err| PackageError::Http {
            operation,
            url: url.to_string(),
            status: None,
            detail: err.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|err| PackageError::json(operation, url.to_string(), err))
    }
}

#[async_trait]
impl TapeGateway for HttpTapeGateway {
    async fn ping(&self) -> PackageResult<()> {
        let url = self.endpoint("ping")?;
        let response = self.send("ping", &url, self.client.get(url.clone())).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejected("ping", &url, response.status()))
        }
    }

    async fn find_clip(
        &self,
        server_id: Option<u32>,
        content: &ClipContent,
    ) -> PackageResult<Option<TapeClip>> {
        let url = self.endpoint("clips")?;
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(server_id) = server_id {
            query.push(("serverId", server_id.to_string()));
        }
        if let Some(guid) = &content.guid {
            query.push(("guid", guid.clone()));
        }
        if let Some(title) = &content.title {
            query.push(("title", title.clone()));
        }
        let response = self
            .send("find_clip", &url, self.client.get(url.clone()).query(&query))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::clip_body("find_clip", &url, response).await.map(Some),
            status => Err(Self::rejected("find_clip", &url, status)),
        }
    }

    async fn copy_clip(&self, request: &ClipCopyRequest) -> PackageResult<TapeClip> {
        let url = self.endpoint("clips/copy")?;
        let response = self
            .send("copy_clip", &url, self.client.post(url.clone()).json(request))
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejected("copy_clip", &url, response.status()));
        }
        Self::clip_body("copy_clip", &url, response).await
    }

    async fn delete_clip(&self, server_id: Option<u32>, clip_id: u64) -> PackageResult<()> {
        let url = self.endpoint(&format!("clips/{clip_id}"))?;
        let mut request = self.client.delete(url.clone());
        if let Some(server_id) = server_id {
            request = request.query(&[("serverId", server_id)]);
        }
        let response = self.send("delete_clip", &url, request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::rejected("delete_clip", &url, status))
        }
    }
}

/// Handle for `TAPE` accessors.
pub struct TapeHandle {
    accessor_id: String,
    accessor: AccessorOnPackage,
    clip: Option<ClipContent>,
    gateway: Option<Arc<dyn TapeGateway>>,
}

impl std::fmt::Debug for TapeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeHandle")
            .field("accessor_id", &self.accessor_id)
            .field("clip", &self.clip)
            .finish_non_exhaustive()
    }
}

impl TapeHandle {
    pub(crate) fn new(
        ctx: &AccessorContext,
        accessor_id: &str,
        accessor: AccessorOnPackage,
        content: &HandleContent,
    ) -> PackageResult<Self> {
        let clip = match content {
            HandleContent::ContainerOnly => None,
            HandleContent::Clip(clip) => {
                let clip = ClipContent {
                    guid: accessor.guid.clone().or_else(|| clip.guid.clone()),
                    title: accessor.title.clone().or_else(|| clip.title.clone()),
                };
                if clip.guid.is_none() && clip.title.is_none() {
                    return Err(PackageError::config("content", "needs a clip guid or title", None));
                }
                Some(clip)
            }
            HandleContent::File(_) => {
                return Err(PackageError::config(
                    "content",
                    "is not clip content",
                    Some(AccessorType::Tape.to_string()),
                ));
            }
        };
        let gateway = match accessor.gateway_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Some(ctx.tape().connect(url)?),
            None => None,
        };
        Ok(Self {
            accessor_id: accessor_id.to_string(),
            accessor,
            clip,
            gateway,
        })
    }

    fn gateway(&self) -> PackageResult<&Arc<dyn TapeGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| PackageError::config("gatewayUrl", "is not set", None))
    }

    fn clip(&self) -> PackageResult<&ClipContent> {
        self.clip
            .as_ref()
            .ok_or_else(|| PackageError::config("content", "is not set for container-only access", None))
    }

    fn describe(clip: &ClipContent) -> String {
        match (&clip.guid, &clip.title) {
            (Some(guid), Some(title)) => format!("{guid} \"{title}\""),
            (Some(guid), None) => guid.clone(),
            (None, Some(title)) => format!("\"{title}\""),
            (None, None) => String::new(),
        }
    }

    async fn find(&self) -> PackageResult<Option<TapeClip>> {
        let clip = self.clip()?;
        self.gateway()?.find_clip(self.accessor.server_id, clip).await
    }

    async fn existing(&self, operation: &'static str) -> PackageResult<TapeClip> {
        self.find().await?.ok_or_else(|| PackageError::NotFound {
            operation,
            target: self.clip().map(Self::describe).unwrap_or_default(),
            detail: "clip not found on archive".to_string(),
        })
    }

    fn check_handle_basic(&self) -> AccessResult {
        if self.accessor.accessor_type != AccessorType::Tape {
            return Err(wrong_type("Tape", "TAPE", &self.accessor));
        }
        if self.gateway.is_none() {
            return Err(Reason::plain("Gateway URL not set"));
        }
        Ok(())
    }

    const fn unsupported(operation: &'static str) -> PackageError {
        PackageError::unsupported(operation, AccessorType::Tape)
    }

    async fn check_gateway(&self) -> AccessResult {
        let gateway = self.gateway().map_err(|err| err.reason())?;
        gateway.ping().await.map_err(|err| {
            Reason::new(
                "Not able to reach tape gateway",
                format!("Not able to reach tape gateway: {}", err.reason().tech),
            )
        })
    }
}

#[async_trait]
impl PackageAccessor for TapeHandle {
    fn accessor_type(&self) -> AccessorType {
        AccessorType::Tape
    }

    fn check_handle_read(&self) -> AccessResult {
        flag_check(self.accessor.allow_read, true)?;
        self.check_handle_basic()
    }

    fn check_handle_write(&self) -> AccessResult {
        flag_check(self.accessor.allow_write, false)?;
        self.check_handle_basic()
    }

    async fn check_package_read_access(&self) -> AccessResult {
        match self.find().await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Reason::new(
                "Clip doesn't exist",
                format!(
                    "Clip not found on tape archive: {}",
                    self.clip().map(Self::describe).unwrap_or_default()
                ),
            )),
            Err(err) => Err(err.reason()),
        }
    }

    async fn try_package_read(&self) -> AccessResult {
        self.check_package_read_access().await
    }

    async fn check_package_container_write_access(&self) -> AccessResult {
        self.check_gateway().await
    }

    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion> {
        let clip = self.existing("get_package_actual_version").await?;
        Ok(PackageVersion::Clip(clip.version()))
    }

    async fn remove_package(&self) -> PackageResult<()> {
        match self.find().await? {
            Some(clip) => {
                self.gateway()?
                    .delete_clip(self.accessor.server_id, clip.clip_id)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream> {
        Err(Self::unsupported("get_package_read_stream"))
    }

    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle> {
        drop(source);
        Err(Self::unsupported("put_package_stream"))
    }

    async fn get_package_read_info(&self) -> PackageResult<PackageReadInfo> {
        let clip = self.existing("get_package_read_info").await?;
        Ok(PackageReadInfo {
            gateway_url: self.accessor.gateway_url.clone().unwrap_or_default(),
            server_id: self.accessor.server_id,
            clip_id: clip.clip_id,
            version: clip.version(),
        })
    }

    async fn put_package_info(&self, info: PackageReadInfo) -> PackageResult<PutPackageHandle> {
        let gateway = Arc::clone(self.gateway()?);
        let target = self.clip()?.clone();
        let description = Self::describe(&target);
        let request = ClipCopyRequest {
            source_gateway_url: info.gateway_url,
            source_server_id: info.server_id,
            source_clip_id: info.clip_id,
            target_server_id: self.accessor.server_id,
            target,
        };
        Ok(PutPackageHandle::spawn(
            description,
            WriteCancellation::Unsupported,
            async move {
                let copied = gateway.copy_clip(&request).await?;
                Ok(copied.frames.unwrap_or_default())
            },
        ))
    }

    async fn finalize_package(&self) -> PackageResult<()> {
        Ok(())
    }

    async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        Ok(None)
    }

    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        let _ = metadata;
        Err(Self::unsupported("update_metadata"))
    }

    async fn remove_metadata(&self) -> PackageResult<()> {
        Err(Self::unsupported("remove_metadata"))
    }

    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        self.check_gateway().await?;
        for job in container.cronjobs.jobs() {
            match job {
                Cronjob::Interval(_) => {}
                Cronjob::Cleanup(_) => {
                    debug!(container_id = %container.id, "cleanup not available on tape archives");
                }
            }
        }
        Ok(())
    }
}
