//! HTTP request handlers.

pub mod blob;
