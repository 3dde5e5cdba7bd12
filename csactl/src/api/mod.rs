//! HTTP API.
//!
//! All routes live under `/api/v1`:
//!
//! - **Ingest** (`/ingest`, `/ingest/batch`): write path for collectors, ingest rate limit
//! - **Functions** (`/functions`, `/functions/{id}`): read path for dashboards, query rate limit
//! - **Health** (`/health`): no authentication
//!
//! Handlers are annotated for `utoipa`; the document is served at `/api/v1/openapi.json` and
//! browsable at `/api/docs`.

pub mod handlers;
pub mod models;
