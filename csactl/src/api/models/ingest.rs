//! API request/response models for ingestion.
//!
//! Request bodies are validated field by field in [`crate::ingest`]; the request types here
//! exist to document the accepted shape in the OpenAPI schema.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ingest::{BatchItemError, BatchOutcome};

/// One invocation as reported by an instrumented function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvocationEnvelope {
    /// 1 to 255 characters
    pub function_name: String,
    /// Generated by the server when absent
    pub invocation_id: Option<String>,
    pub request_id: Option<String>,
    /// When the invocation started (RFC 3339)
    pub timestamp: DateTime<Utc>,
    pub cold_start: bool,
    pub init_duration_ms: Option<f64>,
    pub execution_duration_ms: f64,
    pub billed_duration_ms: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_allocated_mb: Option<u64>,
    /// Load time per dependency in milliseconds. Empty on warm invocations.
    #[serde(default)]
    pub module_timings: BTreeMap<String, f64>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchIngestRequest {
    pub invocations: Vec<InvocationEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub invocation_id: String,
}

impl IngestResponse {
    pub fn ok(invocation_id: String) -> Self {
        Self {
            status: "ok".to_string(),
            invocation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchIngestResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<BatchItemError>,
}

impl From<BatchOutcome> for BatchIngestResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            status: "ok".to_string(),
            processed: outcome.processed,
            failed: outcome.failed,
            errors: outcome.errors,
        }
    }
}
