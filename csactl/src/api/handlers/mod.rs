//! Axum route handlers.
//!
//! - [`ingest`]: single and batch envelope ingestion
//! - [`functions`]: function listing and per-function reports
//! - [`health`]: unauthenticated liveness check
//!
//! Authentication and rate limiting happen in [`crate::auth::middleware`] before a handler
//! runs; handlers receive the resolved [`crate::auth::middleware::Caller`] as an extension.

pub mod functions;
pub mod health;
pub mod ingest;
