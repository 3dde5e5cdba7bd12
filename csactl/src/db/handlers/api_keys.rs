use crate::db::errors::Result;
use crate::db::models::api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse};
use crate::types::{ApiKeyId, ProjectId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

const COLUMNS: &str = "id, project_id, key_hash, key_prefix, label, is_active, created_at, last_used_at";

#[derive(Debug, Clone, FromRow)]
struct ApiKey {
    pub id: ApiKeyId,
    pub project_id: ProjectId,
    pub key_hash: String,
    pub key_prefix: String,
    pub label: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeyDBResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            project_id: key.project_id,
            key_hash: key.key_hash,
            key_prefix: key.key_prefix,
            label: key.label,
            is_active: key.is_active,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
        }
    }
}

pub struct ApiKeys<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&request.project_id), prefix = %request.key_prefix), err)]
    pub async fn create(&mut self, request: &ApiKeyCreateDBRequest) -> Result<ApiKeyDBResponse> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            INSERT INTO api_keys (id, project_id, key_hash, key_prefix, label)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.project_id)
        .bind(&request.key_hash)
        .bind(&request.key_prefix)
        .bind(&request.label)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(key.into())
    }

    #[instrument(skip_all, err)]
    pub async fn get_by_hash(&mut self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!("SELECT {COLUMNS} FROM api_keys WHERE key_hash = $1"))
            .bind(key_hash)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(key.map(Into::into))
    }

    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub async fn touch(&mut self, id: ApiKeyId, used_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(used_at)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Soft delete. Returns false if no such key exists.
    #[instrument(skip(self), fields(api_key_id = %abbrev_uuid(&id)), err)]
    pub async fn deactivate(&mut self, id: ApiKeyId) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
