//! Per-invocation envelope.
//!
//! The [`Envelope`] is the wire record posted to `/api/v1/ingest`. Field names and units match the
//! ingest schema exactly: durations in fractional milliseconds, memory in megabytes.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recorder::{ModuleTimings, as_millis_f64};

/// Identifiers and runtime metadata for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct InvocationContext {
    #[builder(into)]
    pub function_name: String,
    #[builder(into)]
    pub invocation_id: Option<String>,
    #[builder(into)]
    pub request_id: Option<String>,
    pub memory_allocated_mb: Option<u64>,
    #[builder(into)]
    pub runtime_version: Option<String>,
    #[builder(into)]
    pub architecture: Option<String>,
    #[builder(into)]
    pub region: Option<String>,
}

impl InvocationContext {
    /// Populate from the standard Lambda environment. `request_id` is the platform request id
    /// for this invocation (e.g. `lambda_runtime::Context::request_id`).
    pub fn from_env(request_id: impl Into<String>) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            function_name: var("AWS_LAMBDA_FUNCTION_NAME").unwrap_or_else(|| "unknown".to_string()),
            invocation_id: Some(Uuid::new_v4().to_string()),
            request_id: Some(request_id.into()),
            memory_allocated_mb: var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE").and_then(|v| v.parse().ok()),
            runtime_version: var("AWS_EXECUTION_ENV"),
            architecture: Some(host_architecture().to_string()),
            region: var("AWS_REGION"),
        }
    }
}

/// Architecture name in the platform's vocabulary.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub function_name: String,
    pub invocation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub cold_start: bool,
    pub init_duration_ms: Option<f64>,
    pub execution_duration_ms: f64,
    pub billed_duration_ms: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_allocated_mb: Option<u64>,
    /// Accumulated load time per dependency. Always empty on warm invocations.
    pub module_timings: BTreeMap<String, f64>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Assembles an [`Envelope`] once the handler has finished.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    context: InvocationContext,
    cold_start: bool,
    started_at: DateTime<Utc>,
    execution: Duration,
    init_duration: Option<Duration>,
    module_timings: HashMap<String, Duration>,
    memory_used_mb: Option<u64>,
}

impl EnvelopeBuilder {
    pub fn new(context: InvocationContext, cold_start: bool, started_at: DateTime<Utc>, execution: Duration) -> Self {
        Self {
            context,
            cold_start,
            started_at,
            execution,
            init_duration: None,
            module_timings: HashMap::new(),
            memory_used_mb: None,
        }
    }

    /// Init duration only applies to cold starts and is ignored otherwise.
    pub fn init_duration(mut self, init_duration: Option<Duration>) -> Self {
        if self.cold_start {
            self.init_duration = init_duration;
        }
        self
    }

    /// Take the accumulated dependency timings. The accumulator is only drained for cold starts;
    /// warm invocations leave it alone and report an empty map.
    pub fn module_timings(mut self, timings: &ModuleTimings) -> Self {
        if self.cold_start {
            self.module_timings = timings.take();
        }
        self
    }

    pub fn memory_used_mb(mut self, memory_used_mb: Option<u64>) -> Self {
        self.memory_used_mb = memory_used_mb;
        self
    }

    pub fn build(self) -> Envelope {
        let execution_ms = as_millis_f64(self.execution);
        Envelope {
            function_name: self.context.function_name,
            invocation_id: self.context.invocation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            request_id: self.context.request_id,
            timestamp: self.started_at,
            cold_start: self.cold_start,
            init_duration_ms: self.init_duration.map(as_millis_f64),
            execution_duration_ms: execution_ms,
            billed_duration_ms: Some(execution_ms.ceil()),
            memory_used_mb: self.memory_used_mb,
            memory_allocated_mb: self.context.memory_allocated_mb,
            module_timings: self
                .module_timings
                .into_iter()
                .map(|(key, total)| (key, as_millis_f64(total)))
                .collect(),
            runtime_version: self.context.runtime_version,
            architecture: self.context.architecture,
            region: self.context.region,
        }
    }
}

/// Peak resident set size of this process in megabytes, where the OS exposes it.
pub fn peak_memory_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_hwm_kb(&status).map(|kb| kb.div_ceil(1024))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_hwm_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> InvocationContext {
        InvocationContext::builder()
            .function_name("checkout-handler")
            .invocation_id("inv-1")
            .request_id("req-1")
            .memory_allocated_mb(512)
            .runtime_version("AWS_Lambda_rust")
            .architecture("arm64")
            .build()
    }

    fn timings() -> ModuleTimings {
        let timings = ModuleTimings::new();
        timings.record("aws-sdk-s3", Duration::from_millis(120));
        timings.record("serde_yaml", Duration::from_millis(8));
        timings
    }

    #[test]
    fn test_cold_envelope_carries_and_drains_module_timings() {
        let timings = timings();
        let envelope = EnvelopeBuilder::new(context(), true, Utc::now(), Duration::from_millis(40))
            .init_duration(Some(Duration::from_millis(300)))
            .module_timings(&timings)
            .build();

        assert!(envelope.cold_start);
        assert_eq!(envelope.module_timings.len(), 2);
        assert_eq!(envelope.module_timings["aws-sdk-s3"], 120.0);
        assert_eq!(envelope.init_duration_ms, Some(300.0));
        assert!(timings.is_empty(), "cold snapshot should clear the accumulator");
    }

    #[test]
    fn test_warm_envelope_has_empty_module_timings() {
        let timings = timings();
        let envelope = EnvelopeBuilder::new(context(), false, Utc::now(), Duration::from_millis(40))
            .init_duration(Some(Duration::from_millis(300)))
            .module_timings(&timings)
            .build();

        assert!(!envelope.cold_start);
        assert!(envelope.module_timings.is_empty());
        assert_eq!(envelope.init_duration_ms, None);
        assert!(!timings.is_empty(), "warm invocations must not drain the accumulator");
    }

    #[test]
    fn test_billed_duration_rounds_up() {
        let envelope = EnvelopeBuilder::new(context(), false, Utc::now(), Duration::from_micros(12_300)).build();
        assert!((envelope.execution_duration_ms - 12.3).abs() < 1e-9);
        assert_eq!(envelope.billed_duration_ms, Some(13.0));
    }

    #[test]
    fn test_missing_invocation_id_is_generated() {
        let ctx = InvocationContext::builder().function_name("f").build();
        let envelope = EnvelopeBuilder::new(ctx, false, Utc::now(), Duration::ZERO).build();
        assert!(Uuid::parse_str(&envelope.invocation_id).is_ok());
    }

    #[test]
    fn test_wire_format_field_names() {
        let envelope = EnvelopeBuilder::new(context(), true, Utc::now(), Duration::from_millis(5))
            .module_timings(&timings())
            .memory_used_mb(Some(88))
            .build();
        let json = serde_json::to_value(&envelope).unwrap();

        for field in [
            "function_name",
            "invocation_id",
            "request_id",
            "timestamp",
            "cold_start",
            "init_duration_ms",
            "execution_duration_ms",
            "billed_duration_ms",
            "memory_used_mb",
            "memory_allocated_mb",
            "module_timings",
            "runtime_version",
            "architecture",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["memory_used_mb"], 88);
        assert!(json.get("region").is_none());
    }

    #[test]
    fn test_parse_vm_hwm() {
        let status = "Name:\tbootstrap\nVmPeak:\t  200000 kB\nVmHWM:\t   52344 kB\nVmRSS:\t   40000 kB\n";
        assert_eq!(parse_vm_hwm_kb(status), Some(52344));
        assert_eq!(parse_vm_hwm_kb("Name:\tx\n"), None);
    }
}
