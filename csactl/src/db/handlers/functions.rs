use crate::db::errors::Result;
use crate::db::models::functions::{FunctionDBResponse, FunctionUpsertDBRequest};
use crate::types::{FunctionId, ProjectId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

const COLUMNS: &str = "id, project_id, name, runtime, region, memory_mb, first_seen_at, last_seen_at";

#[derive(Debug, Clone, FromRow)]
struct Function {
    pub id: FunctionId,
    pub project_id: ProjectId,
    pub name: String,
    pub runtime: Option<String>,
    pub region: Option<String>,
    pub memory_mb: Option<i64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<Function> for FunctionDBResponse {
    fn from(function: Function) -> Self {
        Self {
            id: function.id,
            project_id: function.project_id,
            name: function.name,
            runtime: function.runtime,
            region: function.region,
            memory_mb: function.memory_mb,
            first_seen_at: function.first_seen_at,
            last_seen_at: function.last_seen_at,
        }
    }
}

pub struct Functions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Functions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Single-statement find-or-create, safe under concurrent first ingests of the same name.
    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&request.project_id), name = %request.name), err)]
    pub async fn upsert(&mut self, request: &FunctionUpsertDBRequest) -> Result<FunctionDBResponse> {
        let function = sqlx::query_as::<_, Function>(&format!(
            r#"
            INSERT INTO functions (id, project_id, name, runtime, region, memory_mb, first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (project_id, name)
            DO UPDATE SET last_seen_at = EXCLUDED.last_seen_at
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.project_id)
        .bind(&request.name)
        .bind(&request.runtime)
        .bind(&request.region)
        .bind(request.memory_mb)
        .bind(request.seen_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(function.into())
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project_id)), err)]
    pub async fn list(&mut self, project_id: ProjectId) -> Result<Vec<FunctionDBResponse>> {
        let functions = sqlx::query_as::<_, Function>(&format!(
            "SELECT {COLUMNS} FROM functions WHERE project_id = $1 ORDER BY name ASC"
        ))
        .bind(project_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(functions.into_iter().map(Into::into).collect())
    }

    /// Scoped to the project so one tenant can never read another's function by ID.
    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project_id), function_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, project_id: ProjectId, id: FunctionId) -> Result<Option<FunctionDBResponse>> {
        let function = sqlx::query_as::<_, Function>(&format!(
            "SELECT {COLUMNS} FROM functions WHERE project_id = $1 AND id = $2"
        ))
        .bind(project_id)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(function.map(Into::into))
    }
}
