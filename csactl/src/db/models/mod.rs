//! Storage-level request and response types, shared by every [`crate::db::TelemetryStore`]
//! implementation.

pub mod api_keys;
pub mod functions;
pub mod invocations;
pub mod projects;
