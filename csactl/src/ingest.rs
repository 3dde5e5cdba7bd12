//! Envelope validation and persistence.
//!
//! Envelopes arrive as untyped JSON so that every problem in a payload can be reported at once,
//! field by field, instead of stopping at the first serde error. Unknown fields are ignored and
//! `null` is treated the same as an absent optional field.
//!
//! A valid envelope becomes a find-or-create on its function (keyed by project and
//! `function_name`) plus one appended invocation row, done atomically by the store. Duplicate
//! `invocation_id`s are stored again; nothing is deduplicated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::TelemetryStore;
use crate::db::models::{functions::FunctionUpsertDBRequest, invocations::InvocationCreateDBRequest};
use crate::errors::{Error, ErrorDetail, FieldError, Result};
use crate::metrics;
use crate::types::{ProjectId, abbrev_uuid};

pub const MAX_NAME_LEN: usize = 255;

/// An envelope that passed validation, split into its function and invocation parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEnvelope {
    pub function_name: String,
    pub region: Option<String>,
    pub invocation: InvocationCreateDBRequest,
}

impl ValidatedEnvelope {
    fn function_upsert(&self, project_id: ProjectId) -> FunctionUpsertDBRequest {
        FunctionUpsertDBRequest {
            project_id,
            name: self.function_name.clone(),
            runtime: self.invocation.runtime_version.clone(),
            region: self.region.clone(),
            memory_mb: self.invocation.memory_allocated_mb,
            seen_at: self.invocation.received_at,
        }
    }
}

/// Collects field errors while reading an envelope object.
struct Fields<'a> {
    object: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn get(&self, field: &str) -> Option<&'a Value> {
        self.object.get(field).filter(|v| !v.is_null())
    }

    fn reject(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    fn required<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() && self.get(field).is_none() {
            self.reject(field, "field required");
        }
        value
    }

    fn string(&mut self, field: &str, max_len: usize) -> Option<String> {
        let value = self.get(field)?;
        match value.as_str() {
            Some(s) if s.chars().count() > max_len => {
                self.reject(field, &format!("must be at most {max_len} characters"));
                None
            }
            Some(s) => Some(s.to_string()),
            None => {
                self.reject(field, "must be a string");
                None
            }
        }
    }

    fn bool(&mut self, field: &str) -> Option<bool> {
        let value = self.get(field)?;
        let parsed = value.as_bool();
        if parsed.is_none() {
            self.reject(field, "must be a boolean");
        }
        parsed
    }

    fn duration_ms(&mut self, field: &str) -> Option<f64> {
        let value = self.get(field)?;
        match value.as_f64() {
            Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms),
            _ => {
                self.reject(field, "must be a non-negative number");
                None
            }
        }
    }

    fn megabytes(&mut self, field: &str) -> Option<i64> {
        let value = self.get(field)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f <= i64::MAX as f64).map(|f| f as i64)),
            _ => None,
        };
        match parsed {
            Some(mb) if mb >= 0 => Some(mb),
            _ => {
                self.reject(field, "must be a non-negative integer");
                None
            }
        }
    }

    fn timestamp(&mut self, field: &str) -> Option<DateTime<Utc>> {
        let value = self.get(field)?;
        match value.as_str().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => Some(ts.with_timezone(&Utc)),
            _ => {
                self.reject(field, "must be an RFC 3339 timestamp");
                None
            }
        }
    }

    fn module_timings(&mut self, field: &str) -> BTreeMap<String, f64> {
        let Some(value) = self.get(field) else {
            return BTreeMap::new();
        };
        let Some(map) = value.as_object() else {
            self.reject(field, "must be an object of module name to milliseconds");
            return BTreeMap::new();
        };

        let mut timings = BTreeMap::new();
        for (module, ms) in map {
            match ms.as_f64() {
                Some(ms) if ms.is_finite() && ms >= 0.0 => {
                    timings.insert(module.clone(), ms);
                }
                _ => self.reject(&format!("{field}.{module}"), "must be a non-negative number"),
            }
        }
        timings
    }
}

/// Validate one envelope, reporting every bad field.
pub fn validate_envelope(value: &Value, received_at: DateTime<Utc>) -> std::result::Result<ValidatedEnvelope, Vec<FieldError>> {
    let Some(object) = value.as_object() else {
        return Err(vec![FieldError::new("body", "must be a JSON object")]);
    };
    let mut fields = Fields {
        object,
        errors: Vec::new(),
    };

    let function_name = fields.string("function_name", MAX_NAME_LEN);
    let function_name = fields.required("function_name", function_name);
    if function_name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        fields.reject("function_name", "must not be empty");
    }
    let timestamp = fields.timestamp("timestamp");
    let timestamp = fields.required("timestamp", timestamp);
    let cold_start = fields.bool("cold_start");
    let cold_start = fields.required("cold_start", cold_start);
    let execution_duration_ms = fields.duration_ms("execution_duration_ms");
    let execution_duration_ms = fields.required("execution_duration_ms", execution_duration_ms);

    let invocation_id = fields.string("invocation_id", MAX_NAME_LEN);
    let request_id = fields.string("request_id", MAX_NAME_LEN);
    let init_duration_ms = fields.duration_ms("init_duration_ms");
    let billed_duration_ms = fields.duration_ms("billed_duration_ms");
    let memory_used_mb = fields.megabytes("memory_used_mb");
    let memory_allocated_mb = fields.megabytes("memory_allocated_mb");
    let module_timings = fields.module_timings("module_timings");
    let runtime_version = fields.string("runtime_version", MAX_NAME_LEN);
    let architecture = fields.string("architecture", 64);
    let region = fields.string("region", 64);

    match (function_name, timestamp, cold_start, execution_duration_ms) {
        (Some(function_name), Some(timestamp), Some(cold_start), Some(execution_duration_ms)) if fields.errors.is_empty() => {
            Ok(ValidatedEnvelope {
                function_name,
                region,
                invocation: InvocationCreateDBRequest {
                    invocation_id: invocation_id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    request_id,
                    timestamp,
                    cold_start,
                    init_duration_ms,
                    execution_duration_ms,
                    billed_duration_ms,
                    memory_used_mb,
                    memory_allocated_mb,
                    module_timings,
                    runtime_version,
                    architecture,
                    received_at,
                },
            })
        }
        _ => Err(fields.errors),
    }
}

async fn persist(store: &dyn TelemetryStore, project_id: ProjectId, envelope: ValidatedEnvelope) -> Result<String> {
    let upsert = envelope.function_upsert(project_id);
    let (function, _) = store.ingest_invocation(&upsert, &envelope.invocation).await?;
    debug!(
        function_id = %abbrev_uuid(&function.id),
        invocation_id = %envelope.invocation.invocation_id,
        cold_start = envelope.invocation.cold_start,
        "Stored invocation"
    );
    Ok(envelope.invocation.invocation_id)
}

/// Validate and store one envelope. Returns the stored `invocation_id`.
#[instrument(skip(store, body), fields(project_id = %abbrev_uuid(&project_id)), err)]
pub async fn ingest_one(store: &dyn TelemetryStore, project_id: ProjectId, body: &Value) -> Result<String> {
    let envelope = validate_envelope(body, Utc::now()).map_err(|errors| {
        metrics::record_ingest_failure("single", "validation");
        Error::Validation { errors }
    })?;
    let invocation_id = persist(store, project_id, envelope).await.inspect_err(|_| {
        metrics::record_ingest_failure("single", "storage");
    })?;
    metrics::record_ingested("single");
    Ok(invocation_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchItemError {
    /// Position of the rejected envelope in the request's `invocations` array
    pub index: usize,
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    /// Ordered by `index`
    pub errors: Vec<BatchItemError>,
}

/// Validate and store every envelope independently, at most `concurrency` at a time.
///
/// One bad item never affects its siblings. The caller enforces the batch size limit.
#[instrument(skip(store, items), fields(project_id = %abbrev_uuid(&project_id), items = items.len()))]
pub async fn ingest_batch(store: &dyn TelemetryStore, project_id: ProjectId, items: Vec<Value>, concurrency: usize) -> BatchOutcome {
    let received_at = Utc::now();

    let results: Vec<std::result::Result<(), ErrorDetail>> = stream::iter(items)
        .map(move |item| async move {
            let envelope = validate_envelope(&item, received_at).map_err(|errors| {
                metrics::record_ingest_failure("batch", "validation");
                ErrorDetail::Fields(errors)
            })?;
            persist(store, project_id, envelope).await.map(|_| ()).map_err(|e| {
                warn!("Failed to store batch item: {e:#}");
                metrics::record_ingest_failure("batch", "storage");
                e.detail()
            })
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = BatchOutcome::default();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(()) => {
                metrics::record_ingested("batch");
                outcome.processed += 1;
            }
            Err(detail) => {
                outcome.failed += 1;
                outcome.errors.push(BatchItemError { index, detail });
            }
        }
    }
    outcome
}
