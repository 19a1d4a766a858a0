//! Azure Blob Storage client.
//!
//! Talks to the Azure Blob REST API via `reqwest`. All blob operations
//! are scoped to the configured default container; `list_containers`
//! operates at the account level.
//!
//! Credentials are resolved via:
//!   - `azure.connection_string` in the config file
//!   - `AZURE_STORAGE_KEY` environment variable (Shared Key auth)
//!   - `AZURE_STORAGE_CONNECTION_STRING` environment variable
//!   - `AZURE_STORAGE_SAS_TOKEN` environment variable (SAS token auth)
//!
//! The store holds no mutable state: one instance is constructed at
//! startup and shared across all requests.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::StatusCode;
use sha2::Sha256;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{AzureConfig, CopyConfig};
use crate::errors::GatewayError;
use crate::model::{parse_last_modified, AccessTier, BlobDescriptor, BlobKind, CopyStatus};

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Page blobs are written in fixed 512-byte pages.
pub const PAGE_SIZE: usize = 512;

/// Blob store client bound to one storage account and one default container.
pub struct AzureBlobStore {
    /// HTTP client for Azure Blob REST API calls.
    client: reqwest::Client,
    /// Azure storage account name.
    account: String,
    /// Default container for blob operations.
    container: String,
    /// The base URL for the Azure Blob service endpoint.
    base_url: String,
    /// Authentication method.
    auth: AzureAuth,
    /// Interval between copy-status polls.
    copy_poll_interval: Duration,
    /// Maximum total wait for a copy to leave the pending state.
    copy_timeout: Duration,
}

/// Azure authentication method.
enum AzureAuth {
    /// Shared Key authentication using the storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
}

/// Remote blob properties surfaced by a HEAD request.
#[derive(Debug, Clone)]
pub struct BlobProperties {
    /// Representation class from `x-ms-blob-type`.
    pub blob_kind: BlobKind,
    /// Copy state from `x-ms-copy-status`, absent if the blob was never a
    /// copy destination.
    pub copy_status: Option<CopyStatus>,
    /// Content length in bytes.
    pub content_length: u64,
}

impl AzureBlobStore {
    /// Create a new blob store client.
    pub fn new(azure: &AzureConfig, copy: &CopyConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let base_url = format!("https://{}.blob.core.windows.net", azure.account);
        let auth = Self::resolve_auth(&azure.connection_string)?;

        info!(
            "Azure blob store initialized: account={} container={}",
            azure.account, azure.container
        );

        Ok(Self {
            client,
            account: azure.account.clone(),
            container: azure.container.clone(),
            base_url,
            auth,
            copy_poll_interval: Duration::from_millis(copy.poll_interval_ms),
            copy_timeout: Duration::from_secs(copy.timeout_secs),
        })
    }

    /// The configured default container name.
    pub fn default_container(&self) -> &str {
        &self.container
    }

    /// Resolve Azure authentication from the config connection string or
    /// environment variables.
    fn resolve_auth(connection_string: &str) -> anyhow::Result<AzureAuth> {
        // 1. Connection string from config.
        if !connection_string.is_empty() {
            let key = account_key_from_connection_string(connection_string).ok_or_else(|| {
                anyhow::anyhow!("azure.connection_string has no AccountKey= segment")
            })?;
            let key_bytes = BASE64_STANDARD
                .decode(key)
                .map_err(|e| anyhow::anyhow!("Invalid AccountKey (not valid base64): {}", e))?;
            return Ok(AzureAuth::SharedKey { key_bytes });
        }

        // 2. AZURE_STORAGE_KEY.
        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            let key_bytes = BASE64_STANDARD.decode(&key).map_err(|e| {
                anyhow::anyhow!("Invalid AZURE_STORAGE_KEY (not valid base64): {}", e)
            })?;
            return Ok(AzureAuth::SharedKey { key_bytes });
        }

        // 3. AZURE_STORAGE_CONNECTION_STRING.
        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            if let Some(key) = account_key_from_connection_string(&conn_str) {
                let key_bytes = BASE64_STANDARD.decode(key).map_err(|e| {
                    anyhow::anyhow!("Invalid AccountKey in connection string: {}", e)
                })?;
                return Ok(AzureAuth::SharedKey { key_bytes });
            }
        }

        // 4. AZURE_STORAGE_SAS_TOKEN.
        if let Ok(sas) = std::env::var("AZURE_STORAGE_SAS_TOKEN") {
            let token = sas.strip_prefix('?').unwrap_or(&sas).to_string();
            return Ok(AzureAuth::SasToken { token });
        }

        Err(anyhow::anyhow!(
            "No Azure credentials found. Set azure.connection_string, AZURE_STORAGE_KEY, \
             AZURE_STORAGE_CONNECTION_STRING, or AZURE_STORAGE_SAS_TOKEN."
        ))
    }

    // -- URL and signing helpers ----------------------------------------------

    /// Build the full URL for a blob in the default container.
    fn blob_url(&self, blob_name: &str) -> String {
        let encoded_blob =
            percent_encoding::utf8_percent_encode(blob_name, &AZURE_BLOB_ENCODE_SET).to_string();
        format!("{}/{}/{}", self.base_url, self.container, encoded_blob)
    }

    /// The blob URL returned to callers after uploads and copies.
    pub fn public_blob_url(&self, blob_name: &str) -> String {
        self.blob_url(blob_name)
    }

    /// Sign a request using Azure Shared Key authentication and return the
    /// Authorization header value.
    ///
    /// `canonical_path` is the resource path after the account: empty for
    /// account-level operations, `{container}` for container-level, and
    /// `{container}/{blob}` for blob-level.
    fn sign_request(
        &self,
        method: &str,
        canonical_path: &str,
        content_length: Option<usize>,
        content_type: &str,
        date: &str,
        extra_headers: &[(String, String)],
        query_params: &[(String, String)],
    ) -> Result<String, GatewayError> {
        let key_bytes = match &self.auth {
            AzureAuth::SharedKey { key_bytes } => key_bytes,
            AzureAuth::SasToken { .. } => {
                return Err(GatewayError::Internal(anyhow::anyhow!(
                    "Cannot sign with SAS token auth"
                )));
            }
        };

        let string_to_sign = string_to_sign(
            method,
            &self.account,
            canonical_path,
            content_length,
            content_type,
            date,
            extra_headers,
            query_params,
        );

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        use std::time::SystemTime;
        httpdate::fmt_http_date(SystemTime::now())
    }

    /// Append SAS token to a URL if using SAS auth.
    fn maybe_append_sas(&self, url: &str) -> String {
        match &self.auth {
            AzureAuth::SasToken { token } => {
                if url.contains('?') {
                    format!("{}&{}", url, token)
                } else {
                    format!("{}?{}", url, token)
                }
            }
            AzureAuth::SharedKey { .. } => url.to_string(),
        }
    }

    /// Check if a status code indicates "not found" (404).
    fn is_not_found(status: StatusCode) -> bool {
        status == StatusCode::NOT_FOUND
    }

    /// Map a transport-level reqwest failure. Connectivity problems become
    /// `BackendUnavailable`; anything else is an internal error.
    fn transport_error(context: &str, e: reqwest::Error) -> GatewayError {
        if e.is_connect() || e.is_timeout() {
            GatewayError::BackendUnavailable {
                message: format!("{}: {}", context, e),
            }
        } else {
            GatewayError::Internal(anyhow::anyhow!("Azure {} request failed: {}", context, e))
        }
    }

    /// Map a non-success Azure response to an internal error carrying the
    /// `x-ms-error-code` and body for diagnosis.
    async fn response_error(context: &str, resp: reqwest::Response) -> GatewayError {
        let status = resp.status();
        let code = resp
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await.unwrap_or_default();
        GatewayError::Internal(anyhow::anyhow!(
            "Azure {}: HTTP {} {} - {}",
            context,
            status,
            code,
            body
        ))
    }

    /// Issue a signed request. `canonical_path` and `query_params` must
    /// describe the same resource the URL points at.
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        canonical_path: &str,
        query_params: &[(String, String)],
        extra_headers: &[(String, String)],
        content_type: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, GatewayError> {
        let date = Self::rfc1123_date();
        let content_length = body.as_ref().map(|b| b.len());

        let mut req = self
            .client
            .request(method.clone(), self.maybe_append_sas(url))
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION);

        for (k, v) in extra_headers {
            req = req.header(k, v);
        }
        if !content_type.is_empty() {
            req = req.header("Content-Type", content_type);
        }
        if let Some(data) = body {
            req = req.body(data);
        }

        if let AzureAuth::SharedKey { .. } = &self.auth {
            let auth_header = self.sign_request(
                method.as_str(),
                canonical_path,
                content_length,
                content_type,
                &date,
                extra_headers,
                query_params,
            )?;
            req = req.header("Authorization", auth_header);
        }

        req.send()
            .await
            .map_err(|e| Self::transport_error(method.as_str(), e))
    }

    // -- Listing --------------------------------------------------------------

    /// List all container names in the account, draining continuation
    /// markers before returning.
    pub async fn list_containers(&self) -> Result<Vec<String>, GatewayError> {
        let mut all_names: Vec<String> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = format!("{}/?comp=list", self.base_url);
            let mut query_params = vec![("comp".to_string(), "list".to_string())];
            if let Some(ref m) = marker {
                url.push_str(&format!(
                    "&marker={}",
                    percent_encoding::utf8_percent_encode(m, &AZURE_BLOB_ENCODE_SET)
                ));
                query_params.push(("marker".to_string(), m.clone()));
            }

            let resp = self
                .send(reqwest::Method::GET, &url, "", &query_params, &[], "", None)
                .await?;

            if !resp.status().is_success() {
                return Err(Self::response_error("list_containers", resp).await);
            }

            let body = resp.text().await.map_err(|e| {
                GatewayError::Internal(anyhow::anyhow!("list_containers body read failed: {}", e))
            })?;

            let (names, next_marker) = parse_container_list(&body)?;
            all_names.extend(names);

            match next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        Ok(all_names)
    }

    /// List all blobs in the default container as descriptors, draining
    /// continuation markers before returning.
    pub async fn list_blobs(&self) -> Result<Vec<BlobDescriptor>, GatewayError> {
        let mut all: Vec<BlobDescriptor> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/{}?restype=container&comp=list",
                self.base_url, self.container
            );
            let mut query_params = vec![
                ("comp".to_string(), "list".to_string()),
                ("restype".to_string(), "container".to_string()),
            ];
            if let Some(ref m) = marker {
                url.push_str(&format!(
                    "&marker={}",
                    percent_encoding::utf8_percent_encode(m, &AZURE_BLOB_ENCODE_SET)
                ));
                query_params.push(("marker".to_string(), m.clone()));
            }

            let resp = self
                .send(
                    reqwest::Method::GET,
                    &url,
                    &self.container,
                    &query_params,
                    &[],
                    "",
                    None,
                )
                .await?;

            if Self::is_not_found(resp.status()) {
                return Err(GatewayError::ContainerNotFound {
                    container: self.container.clone(),
                });
            }
            if !resp.status().is_success() {
                return Err(Self::response_error("list_blobs", resp).await);
            }

            let body = resp.text().await.map_err(|e| {
                GatewayError::Internal(anyhow::anyhow!("list_blobs body read failed: {}", e))
            })?;

            let (descriptors, next_marker) = parse_blob_list(&body)?;
            all.extend(descriptors);

            match next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        Ok(all)
    }

    // -- Container lifecycle --------------------------------------------------

    /// Create the default container if it does not already exist.
    /// Idempotent: 409 ContainerAlreadyExists is success.
    pub async fn ensure_container(&self) -> Result<(), GatewayError> {
        let url = format!("{}/{}?restype=container", self.base_url, self.container);
        let query_params = vec![("restype".to_string(), "container".to_string())];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &self.container,
                &query_params,
                &[],
                "",
                None,
            )
            .await?;

        if resp.status().is_success() || resp.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Err(Self::response_error("create_container", resp).await)
    }

    // -- Uploads --------------------------------------------------------------

    /// Unconditional overwrite upload as a block blob, returning the blob
    /// URL. The default container is created on first use.
    pub async fn put_block_blob(&self, blob_name: &str, data: &[u8]) -> Result<String, GatewayError> {
        self.ensure_container().await?;

        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let extra_headers = vec![("x-ms-blob-type".to_string(), "BlockBlob".to_string())];

        debug!(
            "Azure put block blob: container={} blob={}",
            self.container, blob_name
        );

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &[],
                &extra_headers,
                "application/octet-stream",
                Some(data.to_vec()),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::response_error("upload", resp).await);
        }

        Ok(self.public_blob_url(blob_name))
    }

    /// Fetch remote blob properties via HEAD. `Ok(None)` if the blob does
    /// not exist.
    pub async fn blob_properties(
        &self,
        blob_name: &str,
    ) -> Result<Option<BlobProperties>, GatewayError> {
        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);

        let resp = self
            .send(
                reqwest::Method::HEAD,
                &url,
                &canonical_path,
                &[],
                &[],
                "",
                None,
            )
            .await?;

        if Self::is_not_found(resp.status()) {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::response_error("properties", resp).await);
        }

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        Ok(Some(BlobProperties {
            blob_kind: header("x-ms-blob-type")
                .map(|s| BlobKind::from_wire(&s))
                .unwrap_or(BlobKind::Unknown),
            copy_status: header("x-ms-copy-status").map(|s| CopyStatus::from_wire(&s)),
            content_length: header("content-length")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }))
    }

    /// Create an empty append blob.
    async fn create_append_blob(&self, blob_name: &str) -> Result<(), GatewayError> {
        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let extra_headers = vec![("x-ms-blob-type".to_string(), "AppendBlob".to_string())];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &[],
                &extra_headers,
                "",
                None,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::response_error("create_append_blob", resp).await);
        }
        Ok(())
    }

    /// Append one block of bytes to an existing append blob.
    ///
    /// Appending to a blob of a different type surfaces the backend's 409
    /// InvalidBlobType as a generic backend error.
    async fn append_block(&self, blob_name: &str, data: &[u8]) -> Result<(), GatewayError> {
        let url = format!("{}?comp=appendblock", self.blob_url(blob_name));
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let query_params = vec![("comp".to_string(), "appendblock".to_string())];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &query_params,
                &[],
                "application/octet-stream",
                Some(data.to_vec()),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::response_error("append_block", resp).await);
        }
        Ok(())
    }

    /// Append `data` to the named blob, creating an empty append blob
    /// first if the name does not exist. Existing content is preserved.
    pub async fn append_to_blob(&self, blob_name: &str, data: &[u8]) -> Result<String, GatewayError> {
        self.ensure_container().await?;

        if self.blob_properties(blob_name).await?.is_none() {
            debug!(
                "Azure append: creating append blob container={} blob={}",
                self.container, blob_name
            );
            self.create_append_blob(blob_name).await?;
        }

        // The backend rejects zero-length append blocks.
        if !data.is_empty() {
            self.append_block(blob_name, data).await?;
        }

        Ok(self.public_blob_url(blob_name))
    }

    /// Create an empty page blob of `size` bytes (must be 512-aligned).
    async fn create_page_blob(&self, blob_name: &str, size: u64) -> Result<(), GatewayError> {
        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let extra_headers = vec![
            ("x-ms-blob-content-length".to_string(), size.to_string()),
            ("x-ms-blob-type".to_string(), "PageBlob".to_string()),
        ];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &[],
                &extra_headers,
                "",
                None,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::response_error("create_page_blob", resp).await);
        }
        Ok(())
    }

    /// Write `data` (already page-aligned) as one page range at offset 0.
    async fn put_page_range(&self, blob_name: &str, data: Vec<u8>) -> Result<(), GatewayError> {
        let url = format!("{}?comp=page", self.blob_url(blob_name));
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let query_params = vec![("comp".to_string(), "page".to_string())];
        let extra_headers = vec![
            (
                "x-ms-range".to_string(),
                format!("bytes=0-{}", data.len() - 1),
            ),
            ("x-ms-page-write".to_string(), "update".to_string()),
        ];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &query_params,
                &extra_headers,
                "application/octet-stream",
                Some(data),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(Self::response_error("put_page", resp).await);
        }
        Ok(())
    }

    /// Upload `data` as a page blob: the stored object is `data` zero-padded
    /// to the next 512-byte boundary, written as one full-range page write.
    ///
    /// If a blob already exists at this name its size is left as-is; writing
    /// a range beyond it is backend-defined behavior, not validated here.
    pub async fn put_page_blob(&self, blob_name: &str, data: &[u8]) -> Result<String, GatewayError> {
        self.ensure_container().await?;

        let rounded = round_to_page(data.len());

        if self.blob_properties(blob_name).await?.is_none() {
            debug!(
                "Azure page upload: creating page blob container={} blob={} size={}",
                self.container, blob_name, rounded
            );
            self.create_page_blob(blob_name, rounded as u64).await?;
        }

        if rounded > 0 {
            self.put_page_range(blob_name, pad_to_page(data)).await?;
        }

        Ok(self.public_blob_url(blob_name))
    }

    // -- Download / delete / tier ---------------------------------------------

    /// Download the full content of a blob.
    pub async fn download(&self, blob_name: &str) -> Result<Bytes, GatewayError> {
        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);

        debug!(
            "Azure download: container={} blob={}",
            self.container, blob_name
        );

        let resp = self
            .send(
                reqwest::Method::GET,
                &url,
                &canonical_path,
                &[],
                &[],
                "",
                None,
            )
            .await?;

        if Self::is_not_found(resp.status()) {
            return Err(GatewayError::BlobNotFound {
                blob: blob_name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::response_error("download", resp).await);
        }

        resp.bytes().await.map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!("Azure download body read failed: {}", e))
        })
    }

    /// Delete a blob. A missing blob is an error, not a no-op.
    pub async fn delete(&self, blob_name: &str) -> Result<(), GatewayError> {
        let url = self.blob_url(blob_name);
        let canonical_path = format!("{}/{}", self.container, blob_name);

        debug!(
            "Azure delete: container={} blob={}",
            self.container, blob_name
        );

        let resp = self
            .send(
                reqwest::Method::DELETE,
                &url,
                &canonical_path,
                &[],
                &[],
                "",
                None,
            )
            .await?;

        if Self::is_not_found(resp.status()) {
            return Err(GatewayError::BlobNotFound {
                blob: blob_name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::response_error("delete", resp).await);
        }
        Ok(())
    }

    /// Assign an access tier to a blob.
    pub async fn set_access_tier(
        &self,
        blob_name: &str,
        tier: AccessTier,
    ) -> Result<(), GatewayError> {
        let url = format!("{}?comp=tier", self.blob_url(blob_name));
        let canonical_path = format!("{}/{}", self.container, blob_name);
        let query_params = vec![("comp".to_string(), "tier".to_string())];
        let extra_headers = vec![("x-ms-access-tier".to_string(), tier.as_wire().to_string())];

        let resp = self
            .send(
                reqwest::Method::PUT,
                &url,
                &canonical_path,
                &query_params,
                &extra_headers,
                "",
                None,
            )
            .await?;

        if Self::is_not_found(resp.status()) {
            return Err(GatewayError::BlobNotFound {
                blob: blob_name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::response_error("set_tier", resp).await);
        }
        Ok(())
    }

    // -- Server-side copy -----------------------------------------------------

    /// Start an asynchronous server-side copy and poll the destination's
    /// properties until the copy leaves the pending state, returning the
    /// destination URL and the terminal status (`Success` or `Failed`,
    /// both reported to the caller as the final value).
    ///
    /// The wait is bounded: exceeding the configured timeout yields
    /// `CopyTimedOut`. A missing source fails the copy-start call, so the
    /// poll loop is never entered.
    pub async fn copy_blob(
        &self,
        src_name: &str,
        dst_name: &str,
    ) -> Result<(String, CopyStatus), GatewayError> {
        let dst_url = self.blob_url(dst_name);
        let src_url = self.blob_url(src_name);
        let canonical_path = format!("{}/{}", self.container, dst_name);
        let extra_headers = vec![("x-ms-copy-source".to_string(), src_url.clone())];

        debug!("Azure copy: src={} dst={}", src_url, dst_url);

        let resp = self
            .send(
                reqwest::Method::PUT,
                &dst_url,
                &canonical_path,
                &[],
                &extra_headers,
                "",
                None,
            )
            .await?;

        if Self::is_not_found(resp.status()) {
            return Err(GatewayError::BlobNotFound {
                blob: src_name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::response_error("copy", resp).await);
        }

        let mut status = resp
            .headers()
            .get("x-ms-copy-status")
            .and_then(|v| v.to_str().ok())
            .map(CopyStatus::from_wire)
            .unwrap_or(CopyStatus::Pending);

        let deadline = Instant::now() + self.copy_timeout;
        while status == CopyStatus::Pending {
            if Instant::now() >= deadline {
                return Err(GatewayError::CopyTimedOut {
                    blob: dst_name.to_string(),
                });
            }
            tokio::time::sleep(self.copy_poll_interval).await;

            let props = self.blob_properties(dst_name).await?.ok_or_else(|| {
                GatewayError::BlobNotFound {
                    blob: dst_name.to_string(),
                }
            })?;
            status = props.copy_status.unwrap_or(CopyStatus::Pending);
            debug!("Azure copy poll: dst={} status={:?}", dst_name, status);
        }

        Ok((self.public_blob_url(dst_name), status))
    }
}

// -- Page alignment -----------------------------------------------------------

/// Round `len` up to the next 512-byte page boundary.
pub fn round_to_page(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Copy `data` into a zero-padded buffer of exactly `round_to_page(len)`
/// bytes.
fn pad_to_page(data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; round_to_page(data.len())];
    buf[..data.len()].copy_from_slice(data);
    buf
}

// -- Shared Key string-to-sign ------------------------------------------------

/// Build the Shared Key string-to-sign.
///
/// Format:
/// ```text
/// VERB\n
/// Content-Encoding\n
/// Content-Language\n
/// Content-Length\n
/// Content-MD5\n
/// Content-Type\n
/// Date\n
/// If-Modified-Since\n
/// If-Match\n
/// If-None-Match\n
/// If-Unmodified-Since\n
/// Range\n
/// CanonicalizedHeaders\n
/// CanonicalizedResource
/// ```
#[allow(clippy::too_many_arguments)]
fn string_to_sign(
    method: &str,
    account: &str,
    canonical_path: &str,
    content_length: Option<usize>,
    content_type: &str,
    date: &str,
    extra_headers: &[(String, String)],
    query_params: &[(String, String)],
) -> String {
    // Content-Length: empty for 0 or if not provided (GET/DELETE/HEAD).
    let content_length_str = match content_length {
        Some(0) | None => String::new(),
        Some(len) => len.to_string(),
    };

    // Canonicalized headers: x-ms-* headers, lowercased and sorted.
    let mut ms_headers: Vec<(String, String)> = vec![
        ("x-ms-date".to_string(), date.to_string()),
        ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
    ];
    for (k, v) in extra_headers {
        let lk = k.to_lowercase();
        if lk.starts_with("x-ms-") && lk != "x-ms-date" && lk != "x-ms-version" {
            ms_headers.push((lk, v.clone()));
        }
    }
    ms_headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonicalized_headers: String = ms_headers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    // Canonicalized resource: the un-encoded resource path plus query
    // parameters sorted by key.
    let mut canonicalized_resource = format!("/{}/{}", account, canonical_path);
    if !query_params.is_empty() {
        let mut sorted_params = query_params.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in &sorted_params {
            canonicalized_resource.push_str(&format!("\n{}:{}", k.to_lowercase(), v));
        }
    }

    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
        method, content_length_str, content_type, canonicalized_headers, canonicalized_resource
    )
}

/// Extract the `AccountKey=` segment from a connection string.
fn account_key_from_connection_string(conn_str: &str) -> Option<&str> {
    conn_str
        .split(';')
        .find_map(|part| part.strip_prefix("AccountKey="))
}

// -- List XML parsing ---------------------------------------------------------

/// Parse a List Containers response, returning the container names and
/// the next continuation marker if one is present.
fn parse_container_list(xml: &str) -> Result<(Vec<String>, Option<String>), GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut names = Vec::new();
    let mut next_marker = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Err(e) => return Err(malformed_xml(e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(malformed_xml)?;
                if path_ends_with(&path, &["Container", "Name"]) {
                    names.push(text.into_owned());
                } else if path_ends_with(&path, &["EnumerationResults", "NextMarker"])
                    && !text.is_empty()
                {
                    next_marker = Some(text.into_owned());
                }
            }
            Ok(_) => {}
        }
    }

    Ok((names, next_marker))
}

/// Parse a List Blobs response into descriptors plus the next marker.
fn parse_blob_list(xml: &str) -> Result<(Vec<BlobDescriptor>, Option<String>), GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut descriptors = Vec::new();
    let mut next_marker = None;
    let mut current: Option<BlobDescriptor> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Err(e) => return Err(malformed_xml(e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Blob" && path_ends_with(&path, &["Blobs"]) {
                    current = Some(BlobDescriptor {
                        name: String::new(),
                        blob_kind: BlobKind::Unknown,
                        access_tier: AccessTier::Unknown,
                        last_modified: None,
                    });
                }
                path.push(name);
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Blob" {
                    if let Some(blob) = current.take() {
                        descriptors.push(blob);
                    }
                }
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(malformed_xml)?;
                if path_ends_with(&path, &["Blobs", "Blob", "Name"]) {
                    if let Some(ref mut blob) = current {
                        blob.name = text.into_owned();
                    }
                } else if path_ends_with(&path, &["Blob", "Properties", "BlobType"]) {
                    if let Some(ref mut blob) = current {
                        blob.blob_kind = BlobKind::from_wire(&text);
                    }
                } else if path_ends_with(&path, &["Blob", "Properties", "AccessTier"]) {
                    if let Some(ref mut blob) = current {
                        blob.access_tier = AccessTier::from_wire(&text);
                    }
                } else if path_ends_with(&path, &["Blob", "Properties", "Last-Modified"]) {
                    if let Some(ref mut blob) = current {
                        blob.last_modified = parse_last_modified(&text);
                    }
                } else if path_ends_with(&path, &["EnumerationResults", "NextMarker"])
                    && !text.is_empty()
                {
                    next_marker = Some(text.into_owned());
                }
            }
            Ok(_) => {}
        }
    }

    Ok((descriptors, next_marker))
}

fn malformed_xml(e: quick_xml::Error) -> GatewayError {
    GatewayError::Internal(anyhow::anyhow!("malformed list response XML: {}", e))
}

/// True if `path` ends with the given element-name suffix.
fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

/// Percent-encoding set for Azure blob names: encode everything except
/// unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AzureConfig, CopyConfig};

    fn test_store() -> AzureBlobStore {
        AzureBlobStore {
            client: reqwest::Client::new(),
            account: "teststore".to_string(),
            container: "uploads".to_string(),
            base_url: "https://teststore.blob.core.windows.net".to_string(),
            auth: AzureAuth::SharedKey {
                key_bytes: b"0123456789abcdef".to_vec(),
            },
            copy_poll_interval: Duration::from_millis(10),
            copy_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_round_to_page() {
        assert_eq!(round_to_page(0), 0);
        assert_eq!(round_to_page(1), 512);
        assert_eq!(round_to_page(511), 512);
        assert_eq!(round_to_page(512), 512);
        assert_eq!(round_to_page(513), 1024);
        assert_eq!(round_to_page(4096), 4096);
    }

    #[test]
    fn test_pad_to_page_zero_fills_tail() {
        let padded = pad_to_page(b"hello");
        assert_eq!(padded.len(), 512);
        assert_eq!(&padded[..5], b"hello");
        assert!(padded[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad_to_page_single_byte() {
        // One byte of content always stores a full 512-byte page.
        let padded = pad_to_page(b"x");
        assert_eq!(padded.len(), 512);
        assert_eq!(padded[0], b'x');
    }

    #[test]
    fn test_pad_to_page_empty() {
        assert!(pad_to_page(b"").is_empty());
    }

    #[test]
    fn test_pad_to_page_exact_boundary() {
        let data = vec![7u8; 1024];
        let padded = pad_to_page(&data);
        assert_eq!(padded.len(), 1024);
        assert_eq!(padded, data);
    }

    #[test]
    fn test_blob_url_encoding() {
        let store = test_store();
        assert_eq!(
            store.blob_url("simple-blob"),
            "https://teststore.blob.core.windows.net/uploads/simple-blob"
        );
        // '/' is preserved, spaces are encoded.
        let url = store.blob_url("dir/file with spaces.txt");
        assert!(url.ends_with("/uploads/dir/file%20with%20spaces.txt"));
    }

    #[test]
    fn test_string_to_sign_blob_put() {
        let s = string_to_sign(
            "PUT",
            "teststore",
            "uploads/report.pdf",
            Some(11),
            "application/octet-stream",
            "Mon, 27 Jul 2026 11:30:19 GMT",
            &[("x-ms-blob-type".to_string(), "BlockBlob".to_string())],
            &[],
        );
        let expected = "PUT\n\n\n11\n\napplication/octet-stream\n\n\n\n\n\n\n\
                        x-ms-blob-type:BlockBlob\n\
                        x-ms-date:Mon, 27 Jul 2026 11:30:19 GMT\n\
                        x-ms-version:2023-11-03\n\
                        /teststore/uploads/report.pdf";
        assert_eq!(s, expected);
    }

    #[test]
    fn test_string_to_sign_zero_length_body() {
        // Content-Length 0 signs as an empty slot.
        let s = string_to_sign(
            "PUT",
            "teststore",
            "uploads/x",
            Some(0),
            "",
            "date",
            &[],
            &[],
        );
        assert!(s.starts_with("PUT\n\n\n\n\n\n"));
    }

    #[test]
    fn test_string_to_sign_query_params_sorted() {
        let s = string_to_sign(
            "GET",
            "teststore",
            "uploads",
            None,
            "",
            "date",
            &[],
            &[
                ("restype".to_string(), "container".to_string()),
                ("comp".to_string(), "list".to_string()),
            ],
        );
        assert!(s.ends_with("/teststore/uploads\ncomp:list\nrestype:container"));
    }

    #[test]
    fn test_string_to_sign_account_level() {
        let s = string_to_sign(
            "GET",
            "teststore",
            "",
            None,
            "",
            "date",
            &[],
            &[("comp".to_string(), "list".to_string())],
        );
        assert!(s.ends_with("/teststore/\ncomp:list"));
    }

    #[test]
    fn test_sign_request_shared_key_format() {
        let store = test_store();
        let auth = store
            .sign_request("GET", "uploads/a", None, "", "date", &[], &[])
            .unwrap();
        assert!(auth.starts_with("SharedKey teststore:"));
        // Signature is base64.
        let sig = auth.strip_prefix("SharedKey teststore:").unwrap();
        assert!(BASE64_STANDARD.decode(sig).is_ok());
    }

    #[test]
    fn test_maybe_append_sas() {
        let mut store = test_store();
        store.auth = AzureAuth::SasToken {
            token: "sv=2023-11-03&sig=xxx".to_string(),
        };
        assert_eq!(
            store.maybe_append_sas("https://x/c/b"),
            "https://x/c/b?sv=2023-11-03&sig=xxx"
        );
        assert_eq!(
            store.maybe_append_sas("https://x/c/b?comp=tier"),
            "https://x/c/b?comp=tier&sv=2023-11-03&sig=xxx"
        );
    }

    #[test]
    fn test_account_key_from_connection_string() {
        let conn = "DefaultEndpointsProtocol=https;AccountName=t;AccountKey=aGVsbG8=;EndpointSuffix=core.windows.net";
        assert_eq!(account_key_from_connection_string(conn), Some("aGVsbG8="));
        assert_eq!(account_key_from_connection_string("AccountName=t"), None);
    }

    #[test]
    fn test_parse_container_list() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://teststore.blob.core.windows.net/">
  <Containers>
    <Container>
      <Name>uploads</Name>
      <Properties><Last-Modified>Mon, 27 Jul 2026 11:30:19 GMT</Last-Modified></Properties>
    </Container>
    <Container>
      <Name>archive</Name>
      <Properties><Last-Modified>Mon, 27 Jul 2026 11:30:19 GMT</Last-Modified></Properties>
    </Container>
  </Containers>
  <NextMarker />
</EnumerationResults>"#;
        let (names, marker) = parse_container_list(xml).unwrap();
        assert_eq!(names, vec!["uploads", "archive"]);
        assert!(marker.is_none());
    }

    #[test]
    fn test_parse_container_list_with_marker() {
        let xml = r#"<EnumerationResults>
  <Containers><Container><Name>c1</Name></Container></Containers>
  <NextMarker>marker-token</NextMarker>
</EnumerationResults>"#;
        let (names, marker) = parse_container_list(xml).unwrap();
        assert_eq!(names, vec!["c1"]);
        assert_eq!(marker.as_deref(), Some("marker-token"));
    }

    #[test]
    fn test_parse_blob_list() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="uploads">
  <Blobs>
    <Blob>
      <Name>report.pdf</Name>
      <Properties>
        <Last-Modified>Mon, 27 Jul 2026 11:30:19 GMT</Last-Modified>
        <Content-Length>1024</Content-Length>
        <BlobType>BlockBlob</BlobType>
        <AccessTier>Cool</AccessTier>
      </Properties>
    </Blob>
    <Blob>
      <Name>audit.log</Name>
      <Properties>
        <BlobType>AppendBlob</BlobType>
      </Properties>
    </Blob>
    <Blob>
      <Name>disk.vhd</Name>
      <Properties>
        <BlobType>PageBlob</BlobType>
        <AccessTier>SomethingNew</AccessTier>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;
        let (blobs, marker) = parse_blob_list(xml).unwrap();
        assert!(marker.is_none());
        assert_eq!(blobs.len(), 3);

        assert_eq!(blobs[0].name, "report.pdf");
        assert_eq!(blobs[0].blob_kind, BlobKind::Block);
        assert_eq!(blobs[0].access_tier, AccessTier::Cool);
        assert!(blobs[0].last_modified.is_some());

        // Absent tier and timestamp project to Unknown / None.
        assert_eq!(blobs[1].name, "audit.log");
        assert_eq!(blobs[1].blob_kind, BlobKind::Append);
        assert_eq!(blobs[1].access_tier, AccessTier::Unknown);
        assert!(blobs[1].last_modified.is_none());

        // Unmapped tier values project to Unknown rather than erroring.
        assert_eq!(blobs[2].blob_kind, BlobKind::Page);
        assert_eq!(blobs[2].access_tier, AccessTier::Unknown);
    }

    #[test]
    fn test_parse_blob_list_empty() {
        let xml = r#"<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>"#;
        let (blobs, marker) = parse_blob_list(xml).unwrap();
        assert!(blobs.is_empty());
        assert!(marker.is_none());
    }

    #[test]
    fn test_parse_blob_list_escaped_name() {
        let xml = r#"<EnumerationResults><Blobs><Blob>
  <Name>a&amp;b.txt</Name>
  <Properties><BlobType>BlockBlob</BlobType></Properties>
</Blob></Blobs></EnumerationResults>"#;
        let (blobs, _) = parse_blob_list(xml).unwrap();
        assert_eq!(blobs[0].name, "a&b.txt");
    }

    #[test]
    fn test_parse_mismatched_close_tag_errors() {
        assert!(parse_blob_list("<EnumerationResults><Blobs></Wrong></EnumerationResults>").is_err());
    }

    #[test]
    fn test_resolve_auth_prefers_config_connection_string() {
        let conn = "AccountName=t;AccountKey=aGVsbG8=";
        let auth = AzureBlobStore::resolve_auth(conn).unwrap();
        assert!(matches!(auth, AzureAuth::SharedKey { ref key_bytes } if key_bytes == b"hello"));
    }

    #[test]
    fn test_resolve_auth_rejects_bad_key() {
        let conn = "AccountName=t;AccountKey=!!not-base64!!";
        assert!(AzureBlobStore::resolve_auth(conn).is_err());
    }

    #[test]
    fn test_store_construction_from_config() {
        let azure = AzureConfig {
            account: "teststore".to_string(),
            container: "uploads".to_string(),
            connection_string: "AccountName=teststore;AccountKey=aGVsbG8=".to_string(),
        };
        let store = AzureBlobStore::new(&azure, &CopyConfig::default()).unwrap();
        assert_eq!(store.default_container(), "uploads");
        assert_eq!(
            store.public_blob_url("a.txt"),
            "https://teststore.blob.core.windows.net/uploads/a.txt"
        );
        assert_eq!(store.copy_poll_interval, Duration::from_millis(1000));
        assert_eq!(store.copy_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_path_ends_with() {
        let path: Vec<String> = ["EnumerationResults", "Blobs", "Blob", "Name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(path_ends_with(&path, &["Blob", "Name"]));
        assert!(path_ends_with(&path, &["Name"]));
        assert!(!path_ends_with(&path, &["Container", "Name"]));
        assert!(!path_ends_with(&path[..1], &["Blob", "Name"]));
    }
}
