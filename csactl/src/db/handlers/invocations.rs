use std::collections::BTreeMap;

use crate::db::errors::Result;
use crate::db::models::invocations::{InvocationCreateDBRequest, InvocationDBResponse};
use crate::types::{FunctionId, InvocationRowId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct Invocation {
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
    pub module_timings: Json<BTreeMap<String, f64>>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<Invocation> for InvocationDBResponse {
    fn from(row: Invocation) -> Self {
        Self {
            id: row.id,
            function_id: row.function_id,
            invocation_id: row.invocation_id,
            request_id: row.request_id,
            timestamp: row.timestamp,
            cold_start: row.cold_start,
            init_duration_ms: row.init_duration_ms,
            execution_duration_ms: row.execution_duration_ms,
            billed_duration_ms: row.billed_duration_ms,
            memory_used_mb: row.memory_used_mb,
            memory_allocated_mb: row.memory_allocated_mb,
            module_timings: row.module_timings.0,
            runtime_version: row.runtime_version,
            architecture: row.architecture,
            received_at: row.received_at,
        }
    }
}

pub struct Invocations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Invocations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(function_id = %abbrev_uuid(&function_id), invocation_id = %request.invocation_id), err)]
    pub async fn create(&mut self, function_id: FunctionId, request: &InvocationCreateDBRequest) -> Result<InvocationRowId> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invocations (
                id, function_id, invocation_id, request_id, timestamp, cold_start,
                init_duration_ms, execution_duration_ms, billed_duration_ms,
                memory_used_mb, memory_allocated_mb, module_timings,
                runtime_version, architecture, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(id)
        .bind(function_id)
        .bind(&request.invocation_id)
        .bind(&request.request_id)
        .bind(request.timestamp)
        .bind(request.cold_start)
        .bind(request.init_duration_ms)
        .bind(request.execution_duration_ms)
        .bind(request.billed_duration_ms)
        .bind(request.memory_used_mb)
        .bind(request.memory_allocated_mb)
        .bind(Json(&request.module_timings))
        .bind(&request.runtime_version)
        .bind(&request.architecture)
        .bind(request.received_at)
        .execute(&mut *self.db)
        .await?;

        Ok(id)
    }

    /// Most recent `limit` invocations at or after `since`, newest first.
    #[instrument(skip(self), fields(function_id = %abbrev_uuid(&function_id)), err)]
    pub async fn list_since(&mut self, function_id: FunctionId, since: DateTime<Utc>, limit: i64) -> Result<Vec<InvocationDBResponse>> {
        let rows = sqlx::query_as::<_, Invocation>(
            r#"
            SELECT id, function_id, invocation_id, request_id, timestamp, cold_start,
                   init_duration_ms, execution_duration_ms, billed_duration_ms,
                   memory_used_mb, memory_allocated_mb, module_timings,
                   runtime_version, architecture, received_at
            FROM invocations
            WHERE function_id = $1 AND timestamp >= $2
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(function_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
