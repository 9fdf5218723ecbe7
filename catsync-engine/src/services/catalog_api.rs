//! Remote catalog API boundary
//!
//! `CatalogApi` is the seam between the engine and the remote catalog. Calls
//! are single attempts; retries and back-off belong to `RateLimitedTransport`.
//! `HttpCatalogApi` is the production implementation over HTTP/JSON.

use crate::config::RemoteConfig;
use crate::error::TransportError;
use crate::models::{CatalogPage, Loudness, MetadataPatch, Track};
use async_trait::async_trait;
use catsync_common::{Error, Result};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str = concat!("catsync/", env!("CARGO_PKG_VERSION"));

/// Remote catalog operations (one attempt each)
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Fetch one page of the catalog listing; `None` cursor starts from the beginning
    async fn list_catalog_page(&self, cursor: Option<&str>) -> std::result::Result<CatalogPage, TransportError>;

    /// Upload a new track, returning the remote id assigned to it
    async fn upload(&self, track: &Track) -> std::result::Result<String, TransportError>;

    /// Update metadata of an existing remote entry
    async fn patch_metadata(&self, remote_id: &str, patch: &MetadataPatch) -> std::result::Result<(), TransportError>;
}

/// Metadata part sent with an upload
#[derive(Debug, Serialize)]
struct UploadMetadata<'a> {
    title: &'a str,
    artist: &'a str,
    album: &'a str,
    duration_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    global_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loudness: Option<Loudness>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// HTTP/JSON catalog client
pub struct HttpCatalogApi {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    page_size: u32,
}

impl HttpCatalogApi {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration, page_size: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            page_size: page_size.max(1),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.resolve_api_token(),
            config.request_timeout(),
            config.page_size,
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, TransportError> {
        let response = self.authorize(request).send().await.map_err(map_reqwest_error)?;
        check_status(response).await
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogApi {
    async fn list_catalog_page(&self, cursor: Option<&str>) -> std::result::Result<CatalogPage, TransportError> {
        let url = format!("{}/catalog", self.base_url);
        let mut query = vec![("limit", self.page_size.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        tracing::debug!(url = %url, cursor = ?cursor, "Listing catalog page");

        let response = self.send(self.client.get(&url).query(&query)).await?;
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Protocol(format!("Invalid catalog page: {}", e)))
    }

    async fn upload(&self, track: &Track) -> std::result::Result<String, TransportError> {
        let path = track
            .path
            .as_ref()
            .ok_or_else(|| TransportError::Rejected(format!("Track {} has no source file", track.id)))?;

        let audio = tokio::fs::read(path).await.map_err(|e| {
            TransportError::Rejected(format!("Cannot read source file {}: {}", path.display(), e))
        })?;

        let metadata = UploadMetadata {
            title: &track.title,
            artist: &track.artist,
            album: &track.album,
            duration_seconds: track.duration,
            global_id: track.global_id.as_deref(),
            source_path: Some(path.to_string_lossy().into_owned()),
            loudness: track.loudness,
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| TransportError::Rejected(format!("Cannot encode upload metadata: {}", e)))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", track.id));

        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata_json)
            .part("audio", reqwest::multipart::Part::bytes(audio).file_name(file_name));

        let url = format!("{}/tracks", self.base_url);
        tracing::debug!(url = %url, track_id = %track.id, "Uploading track");

        let response = self.send(self.client.post(&url).multipart(form)).await?;
        let created: UploadResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("Invalid upload response: {}", e)))?;

        Ok(created.id)
    }

    async fn patch_metadata(&self, remote_id: &str, patch: &MetadataPatch) -> std::result::Result<(), TransportError> {
        let url = format!("{}/tracks/{}", self.base_url, remote_id);
        tracing::debug!(url = %url, remote_id, "Patching track metadata");

        self.send(self.client.patch(&url).json(patch)).await?;
        Ok(())
    }
}

/// Map a non-success HTTP status onto the transport error taxonomy
///
/// 429 (and 503 carrying `Retry-After`) is a rate-limit signal; other 5xx and
/// 408 are transient; remaining 4xx are refused requests.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> TransportError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => TransportError::Throttled { retry_after },
        StatusCode::SERVICE_UNAVAILABLE if retry_after.is_some() => TransportError::Throttled { retry_after },
        StatusCode::REQUEST_TIMEOUT => TransportError::Unavailable(detail),
        s if s.is_server_error() => TransportError::Unavailable(detail),
        _ => TransportError::Rejected(detail),
    }
}

/// Parse a numeric `Retry-After` value (seconds)
///
/// Values that do not fit a `Duration` are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

async fn check_status(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    Err(classify_status(status, retry_after, body.trim()))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::Protocol(err.to_string())
    } else if err.is_builder() {
        TransportError::Rejected(err.to_string())
    } else {
        TransportError::Unavailable(err.to_string())
    }
}
