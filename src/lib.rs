//! blobgate library — HTTP gateway for Azure Blob Storage.
//!
//! This crate provides the components for running a thin REST façade over
//! an Azure storage account: request handling, the signed REST client,
//! configuration, and observability. Every gateway operation maps onto
//! one remote call (or a bounded polling loop, for server-side copies);
//! durability and consistency are owned by the storage service.

use std::sync::Arc;

pub mod azure;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod server;

use crate::azure::AzureBlobStore;
use crate::config::Config;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Blob store client bound to the configured account and container.
    pub store: Arc<AzureBlobStore>,
}
