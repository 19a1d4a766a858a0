//! Blob domain types.
//!
//! These are read-through projections of remote metadata: listing
//! regenerates every [`BlobDescriptor`] from the backend's current state,
//! and nothing here is ever persisted locally.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// The representation class of a stored blob.
///
/// Values the remote service reports that we do not recognize map to
/// `Unknown` rather than failing the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum BlobKind {
    Block,
    Append,
    Page,
    Unknown,
}

impl BlobKind {
    /// Map the wire value (`BlockBlob`, `AppendBlob`, `PageBlob`) reported
    /// in listings and `x-ms-blob-type` headers.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "BlockBlob" => BlobKind::Block,
            "AppendBlob" => BlobKind::Append,
            "PageBlob" => BlobKind::Page,
            _ => BlobKind::Unknown,
        }
    }
}

/// Cost/performance class assigned to stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum AccessTier {
    Hot,
    Cool,
    Archive,
    /// Listing projection only; never accepted from callers.
    Unknown,
}

impl AccessTier {
    /// Parse a caller-supplied tier. Only the three settable tiers are
    /// accepted; anything else is rejected by the handler.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Hot" => Some(AccessTier::Hot),
            "Cool" => Some(AccessTier::Cool),
            "Archive" => Some(AccessTier::Archive),
            _ => None,
        }
    }

    /// Map the wire value from a listing; unrecognized tiers project to
    /// `Unknown` rather than erroring.
    pub fn from_wire(s: &str) -> Self {
        Self::parse(s).unwrap_or(AccessTier::Unknown)
    }

    /// The header value sent in `x-ms-access-tier`.
    pub fn as_wire(&self) -> &'static str {
        match self {
            AccessTier::Hot => "Hot",
            AccessTier::Cool => "Cool",
            AccessTier::Archive => "Archive",
            AccessTier::Unknown => "Unknown",
        }
    }
}

/// State of an asynchronous server-side copy, polled from the destination
/// blob's `x-ms-copy-status`.
///
/// `Pending --(poll)--> {Success, Failed}`; both terminal states are
/// returned to the caller as the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
}

impl CopyStatus {
    /// Map the wire value. Azure also reports `aborted`; every terminal
    /// value other than `success` collapses to `Failed`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "pending" => CopyStatus::Pending,
            "success" => CopyStatus::Success,
            _ => CopyStatus::Failed,
        }
    }
}

/// One entry in a container listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BlobDescriptor {
    /// Caller-supplied opaque blob name.
    pub name: String,
    /// Representation class, `Unknown` if unmapped.
    pub blob_kind: BlobKind,
    /// Access tier, `Unknown` if unmapped or absent.
    pub access_tier: AccessTier,
    /// Remote last-modified timestamp, absent if the backend omitted it.
    #[schema(value_type = Option<String>)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Parse the RFC 1123 `Last-Modified` value Azure reports in listings.
pub fn parse_last_modified(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_kind_from_wire() {
        assert_eq!(BlobKind::from_wire("BlockBlob"), BlobKind::Block);
        assert_eq!(BlobKind::from_wire("AppendBlob"), BlobKind::Append);
        assert_eq!(BlobKind::from_wire("PageBlob"), BlobKind::Page);
        assert_eq!(BlobKind::from_wire("FutureBlob"), BlobKind::Unknown);
        assert_eq!(BlobKind::from_wire(""), BlobKind::Unknown);
    }

    #[test]
    fn test_access_tier_parse_strict() {
        assert_eq!(AccessTier::parse("Hot"), Some(AccessTier::Hot));
        assert_eq!(AccessTier::parse("Cool"), Some(AccessTier::Cool));
        assert_eq!(AccessTier::parse("Archive"), Some(AccessTier::Archive));
        // Caller input is case-sensitive and rejects anything else.
        assert_eq!(AccessTier::parse("hot"), None);
        assert_eq!(AccessTier::parse("Nonsense"), None);
        assert_eq!(AccessTier::parse(""), None);
    }

    #[test]
    fn test_access_tier_from_wire_projects_unknown() {
        assert_eq!(AccessTier::from_wire("Cool"), AccessTier::Cool);
        assert_eq!(AccessTier::from_wire("Premium"), AccessTier::Unknown);
    }

    #[test]
    fn test_access_tier_wire_round_trip() {
        for tier in [AccessTier::Hot, AccessTier::Cool, AccessTier::Archive] {
            assert_eq!(AccessTier::parse(tier.as_wire()), Some(tier));
        }
    }

    #[test]
    fn test_copy_status_from_wire() {
        assert_eq!(CopyStatus::from_wire("pending"), CopyStatus::Pending);
        assert_eq!(CopyStatus::from_wire("success"), CopyStatus::Success);
        assert_eq!(CopyStatus::from_wire("failed"), CopyStatus::Failed);
        // Aborted copies are terminal and not successful.
        assert_eq!(CopyStatus::from_wire("aborted"), CopyStatus::Failed);
    }

    #[test]
    fn test_parse_last_modified() {
        let dt = parse_last_modified("Mon, 27 Jul 2026 11:30:19 GMT").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-07-27T11:30:19+00:00");
        assert!(parse_last_modified("not a date").is_none());
    }

    #[test]
    fn test_descriptor_serializes_enums_as_strings() {
        let descriptor = BlobDescriptor {
            name: "report.pdf".to_string(),
            blob_kind: BlobKind::Block,
            access_tier: AccessTier::Cool,
            last_modified: None,
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["name"], "report.pdf");
        assert_eq!(json["blob_kind"], "Block");
        assert_eq!(json["access_tier"], "Cool");
        assert!(json["last_modified"].is_null());
    }
}
