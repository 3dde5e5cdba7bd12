//! PostgreSQL-backed [`TelemetryStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

use super::TelemetryStore;
use super::errors::Result;
use super::handlers::{ApiKeys, Functions, Invocations, Projects};
use super::models::{
    api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
    functions::{FunctionDBResponse, FunctionUpsertDBRequest},
    invocations::{InvocationCreateDBRequest, InvocationDBResponse},
    projects::{ProjectCreateDBRequest, ProjectDBResponse},
};
use crate::config::PoolSettings;
use crate::types::{ApiKeyId, FunctionId, InvocationRowId, ProjectId};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the configured pool settings and bring the schema up to date.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));
        if settings.idle_timeout_secs > 0 {
            options = options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
        }
        if settings.max_lifetime_secs > 0 {
            options = options.max_lifetime(Duration::from_secs(settings.max_lifetime_secs));
        }

        let pool = options.connect(url).await?;
        crate::migrator().run(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TelemetryStore for PostgresStore {
    async fn create_project(&self, request: &ProjectCreateDBRequest) -> Result<ProjectDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Projects::new(&mut conn).create(request).await
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Option<ProjectDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Projects::new(&mut conn).get_by_slug(slug).await
    }

    async fn create_api_key(&self, request: &ApiKeyCreateDBRequest) -> Result<ApiKeyDBResponse> {
        let mut conn = self.pool.acquire().await?;
        ApiKeys::new(&mut conn).create(request).await
    }

    async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        ApiKeys::new(&mut conn).get_by_hash(key_hash).await
    }

    async fn touch_api_key(&self, id: ApiKeyId, used_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        ApiKeys::new(&mut conn).touch(id, used_at).await
    }

    async fn deactivate_api_key(&self, id: ApiKeyId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        ApiKeys::new(&mut conn).deactivate(id).await
    }

    async fn ingest_invocation(
        &self,
        function: &FunctionUpsertDBRequest,
        invocation: &InvocationCreateDBRequest,
    ) -> Result<(FunctionDBResponse, InvocationRowId)> {
        let mut tx = self.pool.begin().await?;
        let function = Functions::new(&mut tx).upsert(function).await?;
        let id = Invocations::new(&mut tx).create(function.id, invocation).await?;
        tx.commit().await?;
        Ok((function, id))
    }

    async fn list_functions(&self, project_id: ProjectId) -> Result<Vec<FunctionDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Functions::new(&mut conn).list(project_id).await
    }

    async fn get_function(&self, project_id: ProjectId, id: FunctionId) -> Result<Option<FunctionDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Functions::new(&mut conn).get(project_id, id).await
    }

    async fn invocations_since(&self, function_id: FunctionId, since: DateTime<Utc>, limit: i64) -> Result<Vec<InvocationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Invocations::new(&mut conn).list_since(function_id, since, limit).await
    }
}
