//! Accessor descriptions attached to package containers.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifier of an accessor within its container.
pub type AccessorId = String;

/// Closed set of backend types an accessor may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessorType {
    /// Folder on the worker's own machine.
    LocalFolder,
    /// Network share addressed by UNC path.
    FileShare,
    /// HTTP endpoint serving packages.
    Http,
    /// Remote record store holding scan results.
    CorePackageInfo,
    /// Tape-archive gateway.
    Tape,
    /// Share already mounted on a drive letter of the worker's machine.
    MappedDrive,
}

impl AccessorType {
    /// Wire name of the accessor type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalFolder => "LOCAL_FOLDER",
            Self::FileShare => "FILE_SHARE",
            Self::Http => "HTTP",
            Self::CorePackageInfo => "CORE_PACKAGE_INFO",
            Self::Tape => "TAPE",
            Self::MappedDrive => "MAPPED_DRIVE",
        }
    }
}

impl Display for AccessorType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Typed access path to a package within a container.
///
/// Only the fields relevant to `accessor_type` are expected to be set; the
/// handlers validate what they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessorOnPackage {
    /// Backend type tag.
    #[serde(rename = "type")]
    pub accessor_type: AccessorType,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Whether packages may be read through this accessor.
    #[serde(default)]
    pub allow_read: bool,
    /// Whether packages may be written through this accessor.
    #[serde(default)]
    pub allow_write: bool,
    /// Computer identity for machine-local accessors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Network identity for network-reachable accessors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Container folder (local path, UNC path or mapped drive root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// Package path inside the container; overrides the expectation content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Share user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Share password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Address the share by its UNC path even when drive letters are available.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_drive_mapping: bool,
    /// Base URL of an HTTP container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Package URL relative to `base_url`; overrides the expectation content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Tape gateway endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    /// Tape server pool identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<u32>,
    /// Tape clip guid; overrides the expectation content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Tape clip title; overrides the expectation content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AccessorOnPackage {
    /// Accessor with only its type set; read and write are disabled.
    #[must_use]
    pub const fn new(accessor_type: AccessorType) -> Self {
        Self {
            accessor_type,
            label: String::new(),
            allow_read: false,
            allow_write: false,
            resource_id: None,
            network_id: None,
            folder_path: None,
            file_path: None,
            user_name: None,
            password: None,
            disable_drive_mapping: false,
            base_url: None,
            url: None,
            gateway_url: None,
            server_id: None,
            guid: None,
            title: None,
        }
    }

    /// Folder on the machine identified by `resource_id`.
    pub fn local_folder(resource_id: impl Into<String>, folder_path: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            folder_path: Some(folder_path.into()),
            ..Self::new(AccessorType::LocalFolder)
        }
    }

    /// Network share reachable from `network_id` (or anywhere when `None`).
    pub fn file_share(folder_path: impl Into<String>, network_id: Option<String>) -> Self {
        Self {
            folder_path: Some(folder_path.into()),
            network_id,
            ..Self::new(AccessorType::FileShare)
        }
    }

    /// HTTP container rooted at `base_url`.
    pub fn http(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::new(AccessorType::Http)
        }
    }

    /// Remote scan-record store.
    #[must_use]
    pub const fn core_package_info() -> Self {
        Self::new(AccessorType::CorePackageInfo)
    }

    /// Tape archive reached through `gateway_url`.
    pub fn tape(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: Some(gateway_url.into()),
            ..Self::new(AccessorType::Tape)
        }
    }

    /// Drive letter root already mounted on the machine identified by `resource_id`.
    pub fn mapped_drive(resource_id: impl Into<String>, folder_path: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            folder_path: Some(folder_path.into()),
            ..Self::new(AccessorType::MappedDrive)
        }
    }

    /// Enable reading.
    #[must_use]
    pub const fn readable(mut self) -> Self {
        self.allow_read = true;
        self
    }

    /// Enable writing.
    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.allow_write = true;
        self
    }

    /// Attach share credentials.
    #[must_use]
    pub fn with_credentials(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password.into());
        self
    }

    /// Never map this share onto a drive letter.
    #[must_use]
    pub const fn without_drive_mapping(mut self) -> Self {
        self.disable_drive_mapping = true;
        self
    }

    /// Set the display label.
    #[must_use]
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_display() -> anyhow::Result<()> {
        for accessor_type in [
            AccessorType::LocalFolder,
            AccessorType::FileShare,
            AccessorType::Http,
            AccessorType::CorePackageInfo,
            AccessorType::Tape,
            AccessorType::MappedDrive,
        ] {
            let encoded = serde_json::to_value(accessor_type)?;
            assert_eq!(encoded, serde_json::Value::from(accessor_type.to_string()));
        }
        Ok(())
    }

    #[test]
    fn accessor_decodes_camel_case_document() -> anyhow::Result<()> {
        let accessor: AccessorOnPackage = serde_json::from_str(
            r#"{
                "type": "FILE_SHARE",
                "label": "Playout share",
                "allowRead": true,
                "folderPath": "\\\\server\\media",
                "userName": "svc",
                "password": "secret"
            }"#,
        )?;
        assert_eq!(accessor.accessor_type, AccessorType::FileShare);
        assert!(accessor.allow_read);
        assert!(!accessor.allow_write);
        assert_eq!(accessor.folder_path.as_deref(), Some(r"\\server\media"));
        assert_eq!(accessor.user_name.as_deref(), Some("svc"));
        assert!(!accessor.disable_drive_mapping);
        Ok(())
    }

    #[test]
    fn drive_mapping_opt_out_is_read_from_the_document() -> anyhow::Result<()> {
        let accessor: AccessorOnPackage = serde_json::from_str(
            r#"{ "type": "FILE_SHARE", "folderPath": "\\\\nas\\media", "disableDriveMapping": true }"#,
        )?;
        assert!(accessor.disable_drive_mapping);
        let encoded = serde_json::to_value(AccessorOnPackage::file_share(r"\\nas\media", None))?;
        assert!(encoded.get("disableDriveMapping").is_none());
        Ok(())
    }
}
