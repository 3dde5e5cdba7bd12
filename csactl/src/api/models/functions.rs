//! API response models for functions and their statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::aggregation::{FunctionReport, FunctionStats, ModuleStats, Recommendation};
use crate::db::models::functions::FunctionDBResponse;
use crate::types::FunctionId;

#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct WindowQuery {
    /// How far back to look, e.g. `1h`, `24h`, `7d`. Defaults to 24h.
    pub window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: FunctionId,
    pub name: String,
    pub runtime: Option<String>,
    pub region: Option<String>,
    pub memory_mb: Option<i64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<FunctionDBResponse> for FunctionResponse {
    fn from(db: FunctionDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            runtime: db.runtime,
            region: db.region,
            memory_mb: db.memory_mb,
            first_seen_at: db.first_seen_at,
            last_seen_at: db.last_seen_at,
        }
    }
}

/// A function with its cold start statistics for the window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionSummary {
    #[serde(flatten)]
    pub function: FunctionResponse,
    pub stats: FunctionStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionListResponse {
    /// Window the statistics cover, in seconds
    pub window_secs: u64,
    pub functions: Vec<FunctionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionDetailResponse {
    pub function: FunctionResponse,
    /// Window the statistics cover, in seconds
    pub window_secs: u64,
    pub stats: FunctionStats,
    pub modules: Vec<ModuleStats>,
    pub recommendations: Vec<Recommendation>,
}

impl FunctionDetailResponse {
    pub fn new(function: FunctionDBResponse, window_secs: u64, report: FunctionReport) -> Self {
        Self {
            function: function.into(),
            window_secs,
            stats: report.stats,
            modules: report.modules,
            recommendations: report.recommendations,
        }
    }
}
