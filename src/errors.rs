//! Gateway error types.
//!
//! Every variant maps to a caller-visible failure mode of the blob
//! gateway.  The enum implements [`axum::response::IntoResponse`] so
//! handlers can simply return `Err(GatewayError::BlobNotFound { .. })`.
//!
//! There is no local recovery or retry anywhere in this service: one
//! failed remote call produces exactly one of these errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Caller-visible gateway failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The storage account could not be reached.
    #[error("The storage backend is unreachable: {message}")]
    BackendUnavailable { message: String },

    /// The specified container does not exist.
    #[error("The specified container does not exist")]
    ContainerNotFound { container: String },

    /// The specified blob does not exist.
    #[error("The specified blob does not exist")]
    BlobNotFound { blob: String },

    /// The caller supplied an access tier outside {Hot, Cool, Archive}.
    #[error("'{value}' is not a valid access tier; expected Hot, Cool, or Archive")]
    InvalidTierValue { value: String },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// A server-side copy did not leave the pending state within the
    /// configured timeout.
    #[error("The copy to '{blob}' did not complete within the configured timeout")]
    CopyTimedOut { blob: String },

    /// Catch-all for unclassified backend failures.
    #[error("The storage backend reported an error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Return the stable error code string used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BackendUnavailable { .. } => "BackendUnavailable",
            GatewayError::ContainerNotFound { .. } => "ContainerNotFound",
            GatewayError::BlobNotFound { .. } => "BlobNotFound",
            GatewayError::InvalidTierValue { .. } => "InvalidTierValue",
            GatewayError::InvalidArgument { .. } => "InvalidArgument",
            GatewayError::CopyTimedOut { .. } => "CopyTimedOut",
            GatewayError::Internal(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ContainerNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BlobNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::InvalidTierValue { .. } => StatusCode::BAD_REQUEST,
            GatewayError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            GatewayError::CopyTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The resource the error refers to, where one exists.
    fn resource(&self) -> Option<&str> {
        match self {
            GatewayError::ContainerNotFound { container } => Some(container),
            GatewayError::BlobNotFound { blob } => Some(blob),
            GatewayError::CopyTimedOut { blob } => Some(blob),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        // Internal errors log the underlying cause; callers get the
        // generic message only.
        if let GatewayError::Internal(ref err) = self {
            tracing::error!(request_id = %request_id, "backend error: {err:#}");
        }

        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(resource) = self.resource() {
            body["resource"] = json!(resource);
        }

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
                ("date", date),
                ("server", "blobgate".to_string()),
            ],
            body.to_string(),
        )
            .into_response()
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::BackendUnavailable {
                message: "dns".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::ContainerNotFound {
                container: "c".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::BlobNotFound { blob: "b".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::InvalidTierValue { value: "x".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::CopyTimedOut { blob: "b".into() }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            GatewayError::BlobNotFound { blob: "b".into() }.code(),
            "BlobNotFound"
        );
        assert_eq!(
            GatewayError::InvalidTierValue { value: "x".into() }.code(),
            "InvalidTierValue"
        );
        assert_eq!(
            GatewayError::CopyTimedOut { blob: "b".into() }.code(),
            "CopyTimedOut"
        );
    }

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn test_invalid_tier_message_names_value() {
        let err = GatewayError::InvalidTierValue {
            value: "Nonsense".into(),
        };
        assert!(err.to_string().contains("Nonsense"));
        assert!(err.to_string().contains("Archive"));
    }
}
