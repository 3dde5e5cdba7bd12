use std::collections::BTreeMap;

use crate::types::{FunctionId, InvocationRowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One validated envelope, ready to append to a function's history.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationCreateDBRequest {
    pub invocation_id: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub cold_start: bool,
    pub init_duration_ms: Option<f64>,
    pub execution_duration_ms: f64,
    pub billed_duration_ms: Option<f64>,
    pub memory_used_mb: Option<i64>,
    pub memory_allocated_mb: Option<i64>,
    pub module_timings: BTreeMap<String, f64>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationDBResponse {
    pub id: InvocationRowId,
    pub function_id: FunctionId,
    pub invocation_id: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub cold_start: bool,
    pub init_duration_ms: Option<f64>,
    pub execution_duration_ms: f64,
    pub billed_duration_ms: Option<f64>,
    pub memory_used_mb: Option<i64>,
    pub memory_allocated_mb: Option<i64>,
    pub module_timings: BTreeMap<String, f64>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InvocationDBResponse {
    pub fn from_request(id: InvocationRowId, function_id: FunctionId, request: InvocationCreateDBRequest) -> Self {
        Self {
            id,
            function_id,
            invocation_id: request.invocation_id,
            request_id: request.request_id,
            timestamp: request.timestamp,
            cold_start: request.cold_start,
            init_duration_ms: request.init_duration_ms,
            execution_duration_ms: request.execution_duration_ms,
            billed_duration_ms: request.billed_duration_ms,
            memory_used_mb: request.memory_used_mb,
            memory_allocated_mb: request.memory_allocated_mb,
            module_timings: request.module_timings,
            runtime_version: request.runtime_version,
            architecture: request.architecture,
            received_at: request.received_at,
        }
    }
}
