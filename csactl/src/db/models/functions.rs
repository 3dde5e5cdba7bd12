use crate::types::{FunctionId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Find-or-create request for a function, keyed by `(project_id, name)`.
///
/// `runtime`, `region` and `memory_mb` only apply when the row is created. An existing row only
/// has `last_seen_at` moved to `seen_at`, the server receive time of the envelope.
#[derive(Debug, Clone)]
pub struct FunctionUpsertDBRequest {
    pub project_id: ProjectId,
    pub name: String,
    pub runtime: Option<String>,
    pub region: Option<String>,
    pub memory_mb: Option<i64>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDBResponse {
    pub id: FunctionId,
    pub project_id: ProjectId,
    pub name: String,
    pub runtime: Option<String>,
    pub region: Option<String>,
    pub memory_mb: Option<i64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
