//! Packages served over plain HTTP.
//!
//! # Design
//! - The package URL is `<baseUrl>/<url or filePath>`; the sidecar lives at
//!   `<package URL>_metadata.json` on the same server.
//! - Reads probe with `HEAD` and stream with `GET`; writes stream a `PUT` body
//!   from a spawned task that can be aborted.
//! - There is no temporary path, removal delay or folder cleanup over HTTP:
//!   finalize is a no-op, delays are logged and ignored, and cron only checks
//!   that the server answers.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::DateTime;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, Cronjob, FileVersion,
    PackageContainerExpectation, PackageError, PackageResult, Reason, WorkOptions,
};
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::context::AccessorContext;
use crate::file_support::METADATA_SUFFIX;
use crate::handle::{
    HandleContent, PackageAccessor, PackageReadStream, PackageReader, PackageVersion,
    PutPackageHandle, WriteCancellation, flag_check, wrong_type,
};

/// Handle for `HTTP` accessors.
#[derive(Debug)]
pub struct HttpHandle {
    accessor_id: String,
    accessor: AccessorOnPackage,
    client: Client,
    path: Option<String>,
    work_options: WorkOptions,
}

fn http_error(operation: &'static str, url: &Url, err: &reqwest::Error) -> PackageError {
    PackageError::Http {
        operation,
        url: url.to_string(),
        status: err.status().map(|status| status.as_u16()),
        detail: err.to_string(),
    }
}

fn status_error(operation: &'static str, url: &Url, status: StatusCode) -> PackageError {
    if status == StatusCode::NOT_FOUND {
        return PackageError::NotFound {
            operation,
            target: url.to_string(),
            detail: status.to_string(),
        };
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return PackageError::AccessDenied {
            operation,
            target: url.to_string(),
            detail: status.to_string(),
        };
    }
    PackageError::Http {
        operation,
        url: url.to_string(),
        status: Some(status.as_u16()),
        detail: status.canonical_reason().unwrap_or_default().to_string(),
    }
}

fn header_version(headers: &HeaderMap) -> FileVersion {
    let file_size = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    let modified_date = headers
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|date| date.timestamp_millis());
    FileVersion {
        file_size,
        modified_date,
        ..FileVersion::default()
    }
}

impl HttpHandle {
    pub(crate) fn new(
        ctx: &AccessorContext,
        accessor_id: &str,
        accessor: AccessorOnPackage,
        content: &HandleContent,
        work_options: WorkOptions,
    ) -> PackageResult<Self> {
        let path = match content {
            HandleContent::ContainerOnly => None,
            HandleContent::File(file) => Some(
                accessor
                    .url
                    .clone()
                    .filter(|url| !url.is_empty())
                    .or_else(|| Some(file.file_path.clone()).filter(|path| !path.is_empty()))
                    .ok_or_else(|| PackageError::config("url", "is not set", None))?,
            ),
            HandleContent::Clip(_) => {
                return Err(PackageError::config(
                    "content",
                    "is not file content",
                    Some(AccessorType::Http.to_string()),
                ));
            }
        };
        Ok(Self {
            accessor_id: accessor_id.to_string(),
            accessor,
            client: ctx.http().clone(),
            path,
            work_options,
        })
    }

    fn base_url(&self) -> PackageResult<Url> {
        let base = self
            .accessor
            .base_url
            .as_deref()
            .filter(|base| !base.is_empty())
            .ok_or_else(|| PackageError::config("baseUrl", "is not set", None))?;
        Url::parse(base)
            .map_err(|_| PackageError::config("baseUrl", "is not a valid URL", Some(base.to_string())))
    }

    /// Absolute URL of the package.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only handles or a malformed base URL.
    pub fn full_url(&self) -> PackageResult<Url> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| PackageError::config("url", "is not set for container-only access", None))?;
        let base = self.base_url()?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|_| PackageError::config("url", "is not a valid URL", Some(joined)))
    }

    fn metadata_url(&self) -> PackageResult<Url> {
        let full = self.full_url()?;
        let joined = format!("{full}{METADATA_SUFFIX}");
        Url::parse(&joined).map_err(|_| PackageError::config("url", "is not a valid URL", Some(joined)))
    }

    async fn head(&self, operation: &'static str, url: &Url) -> PackageResult<Response> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|err| http_error(operation, url, &err))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(operation, url, response.status()))
        }
    }

    async fn delete(&self, operation: &'static str, url: &Url) -> PackageResult<()> {
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|err| http_error(operation, url, &err))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(operation, url, status))
        }
    }

    async fn check_reachable(&self) -> AccessResult {
        let base = self.base_url().map_err(|err| err.reason())?;
        self.client
            .get(base.clone())
            .send()
            .await
            .map(drop)
            .map_err(|err| {
                Reason::new(
                    "Not able to reach package server",
                    format!("Not able to reach package server: {err}"),
                )
            })
    }

    fn check_handle_basic(&self) -> AccessResult {
        if self.accessor.accessor_type != AccessorType::Http {
            return Err(wrong_type("Http", "HTTP", &self.accessor));
        }
        if self.accessor.base_url.as_deref().is_none_or(str::is_empty) {
            return Err(Reason::plain("Base URL not set"));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageAccessor for HttpHandle {
    fn accessor_type(&self) -> AccessorType {
        AccessorType::Http
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
        let url = self.full_url().map_err(|err| err.reason())?;
        match self.head("check_package_read_access", &url).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Err(Reason::new(
                "File doesn't exist",
                format!("Not able to access file: {}", err.reason().tech),
            )),
            Err(err) => Err(err.reason()),
        }
    }

    async fn try_package_read(&self) -> AccessResult {
        self.check_package_read_access().await
    }

    async fn check_package_container_write_access(&self) -> AccessResult {
        self.check_reachable().await
    }

    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion> {
        let url = self.full_url()?;
        let response = self.head("get_package_actual_version", &url).await?;
        Ok(PackageVersion::File(header_version(response.headers())))
    }

    async fn remove_package(&self) -> PackageResult<()> {
        if let Some(delay) = self.work_options.remove_delay {
            debug!(accessor_id = %self.accessor_id, delay, "removal delay ignored over http");
        }
        let url = self.full_url()?;
        self.remove_metadata().await?;
        self.delete("remove_package", &url).await
    }

    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream> {
        let url = self.full_url()?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| http_error("get_package_read_stream", &url, &err))?;
        if !response.status().is_success() {
            return Err(status_error("get_package_read_stream", &url, response.status()));
        }
        let size = response.content_length();
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(PackageReadStream {
            reader: Box::new(StreamReader::new(stream)),
            size,
        })
    }

    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle> {
        let url = self.full_url()?;
        let client = self.client.clone();
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);
        let body = ReaderStream::new(source).inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });
        let target = url.to_string();
        Ok(PutPackageHandle::spawn(target, WriteCancellation::Abortable, async move {
            let response = client
                .put(url.clone())
                .body(reqwest::Body::wrap_stream(body))
                .send()
                .await
                .map_err(|err| http_error("put_package_stream", &url, &err))?;
            if !response.status().is_success() {
                return Err(status_error("put_package_stream", &url, response.status()));
            }
            Ok(written.load(Ordering::Relaxed))
        }))
    }

    async fn finalize_package(&self) -> PackageResult<()> {
        Ok(())
    }

    async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        let url = self.metadata_url()?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| http_error("fetch_metadata", &url, &err))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| http_error("fetch_metadata", &url, &err))?;
                serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|err| PackageError::json("fetch_metadata", url.to_string(), err))
            }
            status => Err(status_error("fetch_metadata", &url, status)),
        }
    }

    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        let url = self.metadata_url()?;
        let response = self
            .client
            .put(url.clone())
            .json(metadata)
            .send()
            .await
            .map_err(|err| http_error("update_metadata", &url, &err))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("update_metadata", &url, response.status()))
        }
    }

    async fn remove_metadata(&self) -> PackageResult<()> {
        let url = self.metadata_url()?;
        self.delete("remove_metadata", &url).await
    }

    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        self.check_reachable().await?;
        for job in container.cronjobs.jobs() {
            match job {
                Cronjob::Interval(_) => {}
                Cronjob::Cleanup(_) => {
                    debug!(container_id = %container.id, "cleanup not available over http");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::LocationConfig;
    use ferry_core::FileContent;
    use ferry_events::EventBus;
    use httpmock::Method::HEAD;
    use httpmock::prelude::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn handle(base_url: &str) -> anyhow::Result<HttpHandle> {
        let ctx = AccessorContext::new(LocationConfig::default(), EventBus::new());
        Ok(HttpHandle::new(
            &ctx,
            "cdn",
            AccessorOnPackage::http(base_url).readable().writable(),
            &HandleContent::File(FileContent::new("report.mov")),
            WorkOptions::default(),
        )?)
    }

    #[test]
    fn package_url_joins_base_and_path() -> anyhow::Result<()> {
        let http = handle("http://media.local/packages/")?;
        assert_eq!(http.full_url()?.as_str(), "http://media.local/packages/report.mov");
        assert_eq!(
            http.metadata_url()?.as_str(),
            "http://media.local/packages/report.mov_metadata.json"
        );
        Ok(())
    }

    #[tokio::test]
    async fn head_probe_reports_missing_package() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD).path("/media/report.mov");
                then.status(404);
            })
            .await;
        let http = handle(&server.url("/media"))?;

        let reason = http.check_package_read_access().await.err();
        assert_eq!(reason.map(|reason| reason.user).as_deref(), Some("File doesn't exist"));
        assert!(
            http.get_package_actual_version()
                .await
                .is_err_and(|err| err.is_not_found())
        );
        Ok(())
    }

    #[tokio::test]
    async fn version_comes_from_last_modified() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD).path("/media/report.mov");
                then.status(200)
                    .header("last-modified", "Tue, 14 Nov 2023 22:13:20 GMT");
            })
            .await;
        let http = handle(&server.url("/media"))?;
        let version = http.get_package_actual_version().await?;
        assert_eq!(
            version.as_file().and_then(|version| version.modified_date),
            Some(1_700_000_000_000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn streams_and_metadata_round_trip_through_server() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let download = server
            .mock_async(|when, then| {
                when.method(GET).path("/media/report.mov");
                then.status(200).body("payload");
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(PUT).path("/media/report.mov").body("fresh bytes");
                then.status(201);
            })
            .await;
        let no_record = server
            .mock_async(|when, then| {
                when.method(GET).path("/media/report.mov_metadata.json");
                then.status(404);
            })
            .await;
        let store_record = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/media/report.mov_metadata.json")
                    .json_body(json!({ "fileSize": 7 }));
                then.status(200);
            })
            .await;
        let http = handle(&server.url("/media"))?;

        let mut stream = http.get_package_read_stream().await?;
        let mut received = String::new();
        stream.reader.read_to_string(&mut received).await?;
        assert_eq!(received, "payload");
        download.assert_async().await;

        let put = http
            .put_package_stream(Box::new(&b"fresh bytes"[..]))
            .await?;
        assert_eq!(put.cancellation(), WriteCancellation::Abortable);
        assert_eq!(put.finished().await?, 11);
        upload.assert_async().await;

        assert_eq!(http.fetch_metadata().await?, None);
        no_record.assert_async().await;
        http.update_metadata(&json!({ "fileSize": 7 })).await?;
        store_record.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn removal_deletes_sidecar_and_package() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let sidecar = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/media/report.mov_metadata.json");
                then.status(404);
            })
            .await;
        let package = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/media/report.mov");
                then.status(204);
            })
            .await;
        let http = handle(&server.url("/media"))?;
        http.remove_package().await?;
        sidecar.assert_async().await;
        package.assert_async().await;
        Ok(())
    }
}
