//! API key authentication.
//!
//! Every ingest and query route sits behind a middleware from [`middleware`] that reads the
//! `X-API-Key` header, looks the key up by its SHA-256 hash, rejects unknown or inactive keys
//! with `AUTHENTICATION_ERROR`, and charges the per-key rate limit bucket for the route. On
//! success the handler receives a [`middleware::Caller`] extension naming the project.
//!
//! Keys are issued from the command line (`csactl --create-api-key <project-slug>`), see
//! [`api_key::issue_api_key`].

pub mod api_key;
pub mod middleware;
