//! Rolling statistics over a function's recent invocations.
//!
//! Everything here is a pure function of the rows loaded for one function and window, so the
//! same rows always produce the same report, in the same order.
//!
//! Percentiles are continuous: the value at rank `p/100 × (n − 1)` of the sorted sample, linearly
//! interpolated between the two nearest order statistics. This matches PostgreSQL's
//! `PERCENTILE_CONT`, so `[100, 200, 300, 400, 500]` gives p50 = 300 and p95 = 480.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use crate::config::AggregationConfig;
use crate::db::TelemetryStore;
use crate::db::models::functions::FunctionDBResponse;
use crate::db::models::invocations::InvocationDBResponse;
use crate::errors::{Error, Result};
use crate::types::{FunctionId, abbrev_uuid};

/// Continuous percentile of an ascending sample. `None` when the sample is empty.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted {
        [] => None,
        [only] => Some(*only),
        _ => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
        }
    }
}

fn sort_samples(samples: &mut [f64]) {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DurationStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DurationStats {
    pub fn from_samples(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        sort_samples(&mut samples);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            mean,
            p50: percentile(&samples, 50.0)?,
            p95: percentile(&samples, 95.0)?,
            p99: percentile(&samples, 99.0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionStats {
    pub total_invocations: usize,
    pub cold_starts: usize,
    /// `cold_starts / total_invocations`, 0 when there are no invocations
    pub cold_start_rate: f64,
    /// Over cold starts that reported an init duration
    pub init_duration: Option<DurationStats>,
    pub execution_duration: Option<DurationStats>,
}

impl FunctionStats {
    pub fn from_rows(rows: &[InvocationDBResponse]) -> Self {
        let total_invocations = rows.len();
        let cold_starts = rows.iter().filter(|r| r.cold_start).count();
        let cold_start_rate = if total_invocations == 0 {
            0.0
        } else {
            cold_starts as f64 / total_invocations as f64
        };

        Self {
            total_invocations,
            cold_starts,
            cold_start_rate,
            init_duration: DurationStats::from_samples(
                rows.iter()
                    .filter(|r| r.cold_start)
                    .filter_map(|r| r.init_duration_ms)
                    .collect(),
            ),
            execution_duration: DurationStats::from_samples(rows.iter().map(|r| r.execution_duration_ms).collect()),
        }
    }
}

/// Load time of one dependency across the cold starts in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModuleStats {
    pub module: String,
    /// Number of cold starts that loaded it
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Per-dependency statistics over cold rows, slowest mean first, ties by name.
pub fn module_breakdown(rows: &[InvocationDBResponse]) -> Vec<ModuleStats> {
    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.cold_start) {
        for (module, ms) in &row.module_timings {
            samples.entry(module.as_str()).or_default().push(*ms);
        }
    }

    let mut modules: Vec<ModuleStats> = samples
        .into_iter()
        .filter_map(|(module, samples)| {
            let count = samples.len();
            let stats = DurationStats::from_samples(samples)?;
            Some(ModuleStats {
                module: module.to_string(),
                count,
                mean_ms: stats.mean,
                p50_ms: stats.p50,
                p95_ms: stats.p95,
                p99_ms: stats.p99,
            })
        })
        .collect();
    modules.sort_by(|a, b| {
        b.mean_ms
            .partial_cmp(&a.mean_ms)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.module.cmp(&b.module))
    });
    modules
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Recommendation {
    pub module: String,
    pub avg_load_ms: f64,
    pub hint: String,
    /// Upper bound on init time saved by not loading the module during init
    pub potential_savings_ms: f64,
}

const GENERIC_HINT: &str = "Load this dependency lazily inside the handler path that needs it instead of at init.";

/// Matched against the lowercased module name, first match wins.
const HINTS: &[(&str, &str)] = &[
    (
        "aws-sdk",
        "Import only the AWS SDK v3 clients you use (e.g. @aws-sdk/client-s3) instead of the whole SDK.",
    ),
    ("boto", "Create boto3 clients lazily and reuse them across invocations."),
    ("lodash", "Import individual lodash functions (lodash/get) or use native equivalents."),
    ("moment", "Replace moment with a smaller library such as date-fns or dayjs."),
    ("prisma", "Generate a slimmer Prisma client and connect on first use rather than at init."),
    ("mongoose", "Connect lazily and cache the mongoose connection outside the handler."),
    ("axios", "Use the runtime's built-in fetch instead of axios."),
    ("sharp", "Ship sharp in a Lambda layer built for the target architecture and load it on demand."),
    ("express", "Drop express in favour of a lightweight router or a plain handler."),
    ("pandas", "Defer importing pandas to the code paths that need it."),
    ("numpy", "Defer importing numpy to the code paths that need it."),
];

pub fn hint_for(module: &str) -> &'static str {
    let lowered = module.to_lowercase();
    HINTS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, hint)| *hint)
        .unwrap_or(GENERIC_HINT)
}

/// Dependencies whose mean load time is a significant share of init, largest savings first.
///
/// "Significant" is `significance_ratio × mean init duration`, or `min_significant_ms` when
/// the window has no init duration data.
pub fn recommendations(modules: &[ModuleStats], init: Option<&DurationStats>, config: &AggregationConfig) -> Vec<Recommendation> {
    let threshold = match init {
        Some(init) => config.significance_ratio * init.mean,
        None => config.min_significant_ms,
    };

    let mut recommendations: Vec<Recommendation> = modules
        .iter()
        .filter(|m| m.mean_ms > threshold)
        .map(|m| Recommendation {
            module: m.module.clone(),
            avg_load_ms: m.mean_ms,
            hint: hint_for(&m.module).to_string(),
            potential_savings_ms: m.mean_ms,
        })
        .collect();
    recommendations.sort_by(|a, b| {
        b.potential_savings_ms
            .partial_cmp(&a.potential_savings_ms)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.module.cmp(&b.module))
    });
    recommendations
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionReport {
    pub stats: FunctionStats,
    pub modules: Vec<ModuleStats>,
    pub recommendations: Vec<Recommendation>,
}

impl FunctionReport {
    pub fn from_rows(rows: &[InvocationDBResponse], config: &AggregationConfig) -> Self {
        let stats = FunctionStats::from_rows(rows);
        let modules = module_breakdown(rows);
        let recommendations = recommendations(&modules, stats.init_duration.as_ref(), config);
        Self {
            stats,
            modules,
            recommendations,
        }
    }
}

/// Resolve an optional `window` query value against the configured default and maximum.
pub fn resolve_window(requested: Option<&str>, config: &AggregationConfig) -> Result<Duration> {
    let window = match requested.map(str::trim).filter(|w| !w.is_empty()) {
        None => return Ok(config.default_window),
        Some(raw) => humantime::parse_duration(raw).map_err(|e| Error::invalid("window", format!("invalid duration: {e}")))?,
    };
    if window.is_zero() {
        return Err(Error::invalid("window", "must be greater than zero"));
    }
    if window > config.max_window {
        return Err(Error::invalid(
            "window",
            format!("must be at most {}", humantime::format_duration(config.max_window)),
        ));
    }
    Ok(window)
}

/// The most recent `max_rows` invocations with a timestamp inside `window`.
#[instrument(skip(store, config), fields(function_id = %abbrev_uuid(&function_id)), err)]
pub async fn load_window(
    store: &dyn TelemetryStore,
    function_id: FunctionId,
    window: Duration,
    config: &AggregationConfig,
) -> Result<Vec<InvocationDBResponse>> {
    let window = chrono::Duration::from_std(window).map_err(|_| Error::invalid("window", "out of range"))?;
    let since = Utc::now() - window;
    Ok(store.invocations_since(function_id, since, config.max_rows).await?)
}

/// Window statistics for each function, in input order.
///
/// At most `list_concurrency` functions have their rows loaded at a time, and each function's
/// rows are dropped once its stats are computed.
pub async fn summarize_functions(
    store: &dyn TelemetryStore,
    functions: Vec<FunctionDBResponse>,
    window: Duration,
    config: &AggregationConfig,
) -> Result<Vec<(FunctionDBResponse, FunctionStats)>> {
    stream::iter(functions)
        .map(|function| async move {
            let rows = load_window(store, function.id, window, config).await?;
            let stats = FunctionStats::from_rows(&rows);
            Ok::<_, Error>((function, stats))
        })
        .buffered(config.list_concurrency.max(1))
        .try_collect()
        .await
}
