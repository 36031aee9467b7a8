// Google Cloud Storage client over the JSON API.
//
// Only the calls the filesystem needs: metadata, media download/upload,
// delete, server-side copy and prefix/delimiter listing. Preconditions are
// passed as `ifGenerationMatch` (0 = object must not exist).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Body, Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::error::{StoreError, StoreResult};
use super::models::{BlobMeta, Generation, Listing, Precondition};
use super::traits::ObjectStore;
use crate::config::StoreConfig;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

pub struct GcsStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

/// Object resource as returned by the JSON API.
#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    updated: Option<String>,
    generation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

impl GcsObject {
    fn into_meta(self) -> StoreResult<BlobMeta> {
        let size = self.size.as_deref().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let updated = self
            .updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let generation = self
            .generation
            .as_deref()
            .and_then(|g| g.parse::<i64>().ok())
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!("missing generation for {}", self.name))
            })?;

        Ok(BlobMeta { key: self.name, size, updated, generation: Generation(generation) })
    }
}

/// HTTP client settings. The timeout bounds connecting and each wait for
/// bytes on the socket, not a whole transfer.
fn client_builder(config: &StoreConfig) -> ClientBuilder {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    Client::builder().connect_timeout(timeout).read_timeout(timeout)
}

impl GcsStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        Self::with_client(config, client_builder(config).build()?)
    }

    fn with_client(config: &StoreConfig, client: Client) -> StoreResult<Self> {
        let token = match (&config.access_token, &config.credentials) {
            (Some(token), _) => Some(token.trim().to_string()),
            (None, Some(path)) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            (None, None) => None,
        };

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            token,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    fn list_url(&self) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, urlencoding::encode(&self.bucket))
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, urlencoding::encode(&self.bucket))
    }

    fn copy_url(&self, src_key: &str, dst_key: &str) -> String {
        format!(
            "{}/copyTo/b/{}/o/{}",
            self.object_url(src_key),
            urlencoding::encode(&self.bucket),
            urlencoding::encode(dst_key)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn with_precondition(request: RequestBuilder, precondition: Precondition) -> RequestBuilder {
        match precondition.if_generation_match() {
            Some(generation) => request.query(&[("ifGenerationMatch", generation.to_string())]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, key: &str) -> StoreResult<Response> {
        let response = self.authorize(request).send().await?;
        check_status(response, key).await
    }

    async fn upload(
        &self,
        key: &str,
        body: Body,
        length: u64,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body);
        let response = self.send(Self::with_precondition(request, precondition), key).await?;
        parse_object(response).await
    }
}

/// Map an HTTP status to the store's error taxonomy.
async fn check_status(response: Response, key: &str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
        StatusCode::PRECONDITION_FAILED => Err(StoreError::PreconditionFailed(key.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(StoreError::PermissionDenied(key.to_string()))
        }
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(StoreError::Http { status: status.as_u16(), message })
        }
    }
}

async fn parse_object(response: Response) -> StoreResult<BlobMeta> {
    let object: GcsObject =
        response.json().await.map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
    object.into_meta()
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get_blob(key).await?.is_some())
    }

    async fn get_blob(&self, key: &str) -> StoreResult<Option<BlobMeta>> {
        let request = self.client.get(self.object_url(key));
        match self.send(request, key).await {
            Ok(response) => parse_object(response).await.map(Some),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upload_from_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let length = data.len() as u64;
        self.upload(key, Body::from(data), length, precondition).await
    }

    async fn upload_from_file(
        &self,
        key: &str,
        local_path: &Path,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();
        self.upload(key, Body::from(file), length, precondition).await
    }

    async fn download_to_file(&self, key: &str, local_path: &Path) -> StoreResult<()> {
        let request = self.client.get(self.object_url(key)).query(&[("alt", "media")]);
        let mut response = self.send(request, key).await?;

        let mut file = tokio::fs::File::create(local_path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &str, precondition: Precondition) -> StoreResult<()> {
        let request = self.client.delete(self.object_url(key));
        self.send(Self::with_precondition(request, precondition), key).await?;
        Ok(())
    }

    async fn copy_blob(
        &self,
        src_key: &str,
        dst_key: &str,
        precondition: Precondition,
    ) -> StoreResult<BlobMeta> {
        let request = self.client.post(self.copy_url(src_key, dst_key));
        let request = Self::with_precondition(request, precondition);
        let response = match self.send(request, src_key).await {
            Err(StoreError::PreconditionFailed(_)) => {
                return Err(StoreError::PreconditionFailed(dst_key.to_string()));
            }
            other => other?,
        };
        parse_object(response).await
    }

    async fn list_blobs(&self, prefix: &str, delimiter: Option<char>) -> StoreResult<Listing> {
        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.list_url()).query(&[("prefix", prefix)]);
            if let Some(delimiter) = delimiter {
                request = request.query(&[("delimiter", delimiter.to_string())]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: GcsListResponse = self
                .send(request, prefix)
                .await?
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

            for object in page.items {
                listing.items.push(object.into_meta()?);
            }
            listing.prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(listing)
    }
}
