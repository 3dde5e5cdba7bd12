//! Request and response bodies of the HTTP API.

pub mod functions;
pub mod health;
pub mod ingest;
