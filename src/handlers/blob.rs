//! Blob gateway HTTP handlers.
//!
//! Each handler maps one route to one store operation. The handlers add
//! no semantics of their own beyond the blob-type dispatch on upload;
//! failures from the store propagate unchanged.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::errors::GatewayError;
use crate::metrics::{BLOB_OPERATIONS_TOTAL, BYTES_RECEIVED_TOTAL, BYTES_SENT_TOTAL};
use crate::model::{AccessTier, BlobDescriptor, CopyStatus};
use crate::AppState;

// -- Response bodies ----------------------------------------------------------

/// Container listing response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ListContainersResponse {
    pub containers: Vec<String>,
}

/// Blob listing response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ListBlobsResponse {
    pub blobs: Vec<BlobDescriptor>,
}

/// Upload result carrying the blob URL.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub url: String,
}

/// Copy result: destination URL plus the terminal copy status.
#[derive(Debug, Serialize, ToSchema)]
pub struct CopyResponse {
    pub url: String,
    pub status: CopyStatus,
}

/// Simple status message.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: String) -> Response {
    Json(MessageResponse { message: text }).into_response()
}

// -- Upload kind dispatch -----------------------------------------------------

/// Which blob representation an upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Generic,
    Block,
    Append,
    Page,
}

impl UploadKind {
    /// Parse the multipart `kind` field, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Some(UploadKind::Generic),
            "block" => Some(UploadKind::Block),
            "append" => Some(UploadKind::Append),
            "page" => Some(UploadKind::Page),
            _ => None,
        }
    }
}

// -- Listing ------------------------------------------------------------------

/// `GET /blob/listcontainers` -- all container names in the account.
#[utoipa::path(
    get,
    path = "/blob/listcontainers",
    tag = "Blob",
    operation_id = "ListContainers",
    responses(
        (status = 200, description = "Container names", body = ListContainersResponse),
        (status = 502, description = "Storage backend unreachable")
    )
)]
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Result<Response, GatewayError> {
    let containers = state.store.list_containers().await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "list_containers").increment(1);
    Ok(Json(ListContainersResponse { containers }).into_response())
}

/// `GET /blob/listblobs` -- descriptors for every blob in the default
/// container.
#[utoipa::path(
    get,
    path = "/blob/listblobs",
    tag = "Blob",
    operation_id = "ListBlobs",
    responses(
        (status = 200, description = "Blob descriptors", body = ListBlobsResponse),
        (status = 404, description = "Container not found")
    )
)]
pub async fn list_blobs(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    let blobs = state.store.list_blobs().await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "list_blobs").increment(1);
    Ok(Json(ListBlobsResponse { blobs }).into_response())
}

// -- Uploads ------------------------------------------------------------------

/// `POST /blob/upload` -- multipart upload.
///
/// Expects a `file` part (its filename becomes the blob name) and an
/// optional `kind` part selecting the blob representation
/// (generic/block/append/page, default generic).
#[utoipa::path(
    post,
    path = "/blob/upload",
    tag = "Blob",
    operation_id = "Upload",
    responses(
        (status = 200, description = "Blob stored", body = UploadResponse),
        (status = 400, description = "Malformed multipart request"),
        (status = 500, description = "Backend error")
    )
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, GatewayError> {
    let mut file: Option<(String, bytes::Bytes)> = None;
    let mut kind = UploadKind::Generic;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::InvalidArgument {
            message: format!("malformed multipart body: {}", e),
        })?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| GatewayError::InvalidArgument {
                        message: "file part has no filename".to_string(),
                    })?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::InvalidArgument {
                        message: format!("failed to read file part: {}", e),
                    })?;
                file = Some((name, data));
            }
            Some("kind") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::InvalidArgument {
                        message: format!("failed to read kind part: {}", e),
                    })?;
                kind = UploadKind::parse(&value).ok_or_else(|| GatewayError::InvalidArgument {
                    message: format!(
                        "'{}' is not a valid upload kind; expected generic, block, append, or page",
                        value
                    ),
                })?;
            }
            _ => {}
        }
    }

    let (name, data) = file.ok_or_else(|| GatewayError::InvalidArgument {
        message: "missing multipart 'file' part".to_string(),
    })?;

    info!(blob = %name, kind = ?kind, size = data.len(), "upload");
    counter!(BYTES_RECEIVED_TOTAL).increment(data.len() as u64);

    let url = match kind {
        // Generic uploads are stored as block blobs; the kinds differ only
        // in which representation they pin.
        UploadKind::Generic | UploadKind::Block => state.store.put_block_blob(&name, &data).await?,
        UploadKind::Append => state.store.append_to_blob(&name, &data).await?,
        UploadKind::Page => state.store.put_page_blob(&name, &data).await?,
    };
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "upload").increment(1);

    Ok(Json(UploadResponse { url }).into_response())
}

/// Sample payloads for `upload_sample_files`, one per blob representation.
const SAMPLE_BLOCK: (&str, &[u8]) = ("sample-block.txt", b"blobgate block blob sample\n");
const SAMPLE_APPEND: (&str, &[u8]) = ("sample-append.log", b"blobgate append blob sample\n");
const SAMPLE_PAGE: (&str, &[u8]) = ("sample-page.bin", &[0x42; 600]);

/// `POST /blob/upload-sample-files` -- seed the default container with one
/// sample blob of each representation.
#[utoipa::path(
    post,
    path = "/blob/upload-sample-files",
    tag = "Blob",
    operation_id = "UploadSampleFiles",
    responses(
        (status = 200, description = "Samples uploaded", body = MessageResponse),
        (status = 500, description = "Backend error")
    )
)]
pub async fn upload_sample_files(
    State(state): State<Arc<AppState>>,
) -> Result<Response, GatewayError> {
    state.store.put_block_blob(SAMPLE_BLOCK.0, SAMPLE_BLOCK.1).await?;
    state
        .store
        .append_to_blob(SAMPLE_APPEND.0, SAMPLE_APPEND.1)
        .await?;
    state.store.put_page_blob(SAMPLE_PAGE.0, SAMPLE_PAGE.1).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "upload_sample_files").increment(1);

    Ok(message(format!(
        "Uploaded sample files: {}, {}, {}.",
        SAMPLE_BLOCK.0, SAMPLE_APPEND.0, SAMPLE_PAGE.0
    )))
}

/// `POST /blob/append/{name}/{content}` -- append the path segment's bytes
/// to the named blob, creating it as an append blob if absent.
#[utoipa::path(
    post,
    path = "/blob/append/{name}/{content}",
    tag = "Blob",
    operation_id = "Append",
    params(
        ("name" = String, Path, description = "Blob name"),
        ("content" = String, Path, description = "Content to append"),
    ),
    responses(
        (status = 200, description = "Content appended", body = MessageResponse),
        (status = 500, description = "Backend error, including appends to non-append blobs")
    )
)]
pub async fn append(
    State(state): State<Arc<AppState>>,
    Path((name, content)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    state.store.append_to_blob(&name, content.as_bytes()).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "append").increment(1);
    Ok(message(format!("Content has been appended to {}.", name)))
}

// -- Download / delete / tier / copy ------------------------------------------

/// `GET /blob/download/{name}` -- full blob content as an octet stream.
#[utoipa::path(
    get,
    path = "/blob/download/{name}",
    tag = "Blob",
    operation_id = "Download",
    params(("name" = String, Path, description = "Blob name")),
    responses(
        (status = 200, description = "Blob content", content_type = "application/octet-stream"),
        (status = 404, description = "Blob not found")
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, GatewayError> {
    let data = state.store.download(&name).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "download").increment(1);
    counter!(BYTES_SENT_TOTAL).increment(data.len() as u64);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/octet-stream".to_string()),
            (
                "content-disposition",
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        data,
    )
        .into_response())
}

/// `DELETE /blob/delete/{name}` -- remove the blob. A missing blob is a
/// 404, not a silent no-op.
#[utoipa::path(
    delete,
    path = "/blob/delete/{name}",
    tag = "Blob",
    operation_id = "Delete",
    params(("name" = String, Path, description = "Blob name")),
    responses(
        (status = 200, description = "Blob deleted", body = MessageResponse),
        (status = 404, description = "Blob not found")
    )
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, GatewayError> {
    state.store.delete(&name).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "delete").increment(1);
    Ok(message(format!("Blob {} has been deleted successfully.", name)))
}

/// `PUT /blob/settier/{name}/{tier}` -- assign an access tier.
///
/// Tier must be exactly Hot, Cool, or Archive; anything else is rejected
/// with 400 InvalidTierValue.
#[utoipa::path(
    put,
    path = "/blob/settier/{name}/{tier}",
    tag = "Blob",
    operation_id = "SetTier",
    params(
        ("name" = String, Path, description = "Blob name"),
        ("tier" = String, Path, description = "Hot, Cool, or Archive"),
    ),
    responses(
        (status = 200, description = "Tier assigned", body = MessageResponse),
        (status = 400, description = "Invalid tier value"),
        (status = 404, description = "Blob not found")
    )
)]
pub async fn set_tier(
    State(state): State<Arc<AppState>>,
    Path((name, tier)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let tier_value = AccessTier::parse(&tier).ok_or(GatewayError::InvalidTierValue {
        value: tier.clone(),
    })?;
    state.store.set_access_tier(&name, tier_value).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "set_tier").increment(1);
    Ok(message(format!(
        "Tier for blob {} has been set to {}.",
        name,
        tier_value.as_wire()
    )))
}

/// `POST /blob/copy/{source}/{dest}` -- server-side copy within the default
/// container, waiting (bounded) for the copy to resolve.
#[utoipa::path(
    post,
    path = "/blob/copy/{source}/{dest}",
    tag = "Blob",
    operation_id = "Copy",
    params(
        ("source" = String, Path, description = "Source blob name"),
        ("dest" = String, Path, description = "Destination blob name"),
    ),
    responses(
        (status = 200, description = "Copy resolved (status Success or Failed)", body = CopyResponse),
        (status = 404, description = "Source blob not found"),
        (status = 504, description = "Copy did not resolve within the timeout")
    )
)]
pub async fn copy(
    State(state): State<Arc<AppState>>,
    Path((source, dest)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let (url, status) = state.store.copy_blob(&source, &dest).await?;
    counter!(BLOB_OPERATIONS_TOTAL, "operation" => "copy").increment(1);
    info!(source = %source, dest = %dest, status = ?status, "copy resolved");
    Ok(Json(CopyResponse { url, status }).into_response())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_kind_parse() {
        assert_eq!(UploadKind::parse("generic"), Some(UploadKind::Generic));
        assert_eq!(UploadKind::parse("Block"), Some(UploadKind::Block));
        assert_eq!(UploadKind::parse("APPEND"), Some(UploadKind::Append));
        assert_eq!(UploadKind::parse("page"), Some(UploadKind::Page));
        assert_eq!(UploadKind::parse("tarball"), None);
        assert_eq!(UploadKind::parse(""), None);
    }

    #[test]
    fn test_sample_page_payload_is_unaligned() {
        // The page sample deliberately needs zero-padding (600 -> 1024).
        assert_eq!(SAMPLE_PAGE.1.len(), 600);
        assert_ne!(SAMPLE_PAGE.1.len() % 512, 0);
    }

    #[test]
    fn test_copy_response_serialization() {
        let resp = CopyResponse {
            url: "https://t.blob.core.windows.net/uploads/dest".to_string(),
            status: CopyStatus::Success,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "Success");
    }
}
