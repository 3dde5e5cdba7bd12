//! Persistence layer.
//!
//! Handlers never talk to a database directly; they go through the object-safe
//! [`TelemetryStore`] trait held in [`crate::AppState`]. Two implementations exist:
//!
//! - [`PostgresStore`]: production storage, built from the per-table repositories in
//!   [`handlers`] over a `sqlx` pool, with schema migrations embedded in the binary
//! - [`InMemoryStore`]: process-local maps, used for development (`database.type: memory`) and
//!   for HTTP tests
//!
//! Both assign UUIDs in the service and apply the same uniqueness rules, so behaviour observed
//! through the API is identical.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ApiKeyId, FunctionId, InvocationRowId, ProjectId};

pub mod errors;
pub mod handlers;
pub mod in_memory;
pub mod models;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use errors::Result;
use models::{
    api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
    functions::{FunctionDBResponse, FunctionUpsertDBRequest},
    invocations::{InvocationCreateDBRequest, InvocationDBResponse},
    projects::{ProjectCreateDBRequest, ProjectDBResponse},
};

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Fails with `UniqueViolation` if the slug is taken.
    async fn create_project(&self, request: &ProjectCreateDBRequest) -> Result<ProjectDBResponse>;

    async fn get_project_by_slug(&self, slug: &str) -> Result<Option<ProjectDBResponse>>;

    /// Fails with `ForeignKeyViolation` if the project does not exist.
    async fn create_api_key(&self, request: &ApiKeyCreateDBRequest) -> Result<ApiKeyDBResponse>;

    /// Looks up by hash only. Inactive keys are returned too; callers decide what to do with them.
    async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>>;

    async fn touch_api_key(&self, id: ApiKeyId, used_at: DateTime<Utc>) -> Result<()>;

    async fn deactivate_api_key(&self, id: ApiKeyId) -> Result<bool>;

    /// Find-or-create the function and append the invocation to it, atomically.
    async fn ingest_invocation(
        &self,
        function: &FunctionUpsertDBRequest,
        invocation: &InvocationCreateDBRequest,
    ) -> Result<(FunctionDBResponse, InvocationRowId)>;

    async fn list_functions(&self, project_id: ProjectId) -> Result<Vec<FunctionDBResponse>>;

    async fn get_function(&self, project_id: ProjectId, id: FunctionId) -> Result<Option<FunctionDBResponse>>;

    /// Most recent `limit` invocations with `timestamp >= since`, newest first.
    async fn invocations_since(&self, function_id: FunctionId, since: DateTime<Utc>, limit: i64) -> Result<Vec<InvocationDBResponse>>;
}
