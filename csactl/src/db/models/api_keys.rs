//! Database models for API keys.
//!
//! Only the SHA-256 hash and the display prefix of a key are ever stored.

use crate::types::{ApiKeyId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub project_id: ProjectId,
    pub label: String,
    pub key_hash: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyDBResponse {
    pub id: ApiKeyId,
    pub project_id: ProjectId,
    pub key_hash: String,
    pub key_prefix: String,
    pub label: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
