//! Process-local [`TelemetryStore`].
//!
//! All tables sit behind one `RwLock`, so a find-or-create plus append is atomic the same way
//! the Postgres transaction is. Data is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::TelemetryStore;
use super::errors::{DbError, Result};
use super::models::{
    api_keys::{ApiKeyCreateDBRequest, ApiKeyDBResponse},
    functions::{FunctionDBResponse, FunctionUpsertDBRequest},
    invocations::{InvocationCreateDBRequest, InvocationDBResponse},
    projects::{ProjectCreateDBRequest, ProjectDBResponse},
};
use crate::types::{ApiKeyId, FunctionId, InvocationRowId, ProjectId};

#[derive(Default)]
struct Tables {
    projects: HashMap<ProjectId, ProjectDBResponse>,
    api_keys: HashMap<ApiKeyId, ApiKeyDBResponse>,
    functions: HashMap<FunctionId, FunctionDBResponse>,
    invocations: HashMap<FunctionId, Vec<InvocationDBResponse>>,
}

fn unique_violation(table: &str, constraint: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: Some(constraint.to_string()),
        table: Some(table.to_string()),
        message: format!("duplicate key value violates unique constraint \"{constraint}\""),
    }
}

fn foreign_key_violation(table: &str, constraint: &str) -> DbError {
    DbError::ForeignKeyViolation {
        constraint: Some(constraint.to_string()),
        table: Some(table.to_string()),
        message: format!("insert or update on table \"{table}\" violates foreign key constraint \"{constraint}\""),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn create_project(&self, request: &ProjectCreateDBRequest) -> Result<ProjectDBResponse> {
        let mut tables = self.tables.write().await;
        if tables.projects.values().any(|p| p.slug == request.slug) {
            return Err(unique_violation("projects", "projects_slug_key"));
        }
        let project = ProjectDBResponse {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            slug: request.slug.clone(),
            created_at: Utc::now(),
        };
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Option<ProjectDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.projects.values().find(|p| p.slug == slug).cloned())
    }

    async fn create_api_key(&self, request: &ApiKeyCreateDBRequest) -> Result<ApiKeyDBResponse> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&request.project_id) {
            return Err(foreign_key_violation("api_keys", "api_keys_project_id_fkey"));
        }
        if tables.api_keys.values().any(|k| k.key_hash == request.key_hash) {
            return Err(unique_violation("api_keys", "api_keys_key_hash_key"));
        }
        let key = ApiKeyDBResponse {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            key_hash: request.key_hash.clone(),
            key_prefix: request.key_prefix.clone(),
            label: request.label.clone(),
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        tables.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.api_keys.values().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn touch_api_key(&self, id: ApiKeyId, used_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = tables.api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        key.last_used_at = Some(used_at);
        Ok(())
    }

    async fn deactivate_api_key(&self, id: ApiKeyId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.api_keys.get_mut(&id) {
            Some(key) if key.is_active => {
                key.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ingest_invocation(
        &self,
        function: &FunctionUpsertDBRequest,
        invocation: &InvocationCreateDBRequest,
    ) -> Result<(FunctionDBResponse, InvocationRowId)> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&function.project_id) {
            return Err(foreign_key_violation("functions", "functions_project_id_fkey"));
        }

        let existing = tables
            .functions
            .values_mut()
            .find(|f| f.project_id == function.project_id && f.name == function.name);
        let row = match existing {
            Some(row) => {
                row.last_seen_at = function.seen_at;
                row.clone()
            }
            None => {
                let row = FunctionDBResponse {
                    id: Uuid::new_v4(),
                    project_id: function.project_id,
                    name: function.name.clone(),
                    runtime: function.runtime.clone(),
                    region: function.region.clone(),
                    memory_mb: function.memory_mb,
                    first_seen_at: function.seen_at,
                    last_seen_at: function.seen_at,
                };
                tables.functions.insert(row.id, row.clone());
                row
            }
        };

        let id = Uuid::new_v4();
        tables
            .invocations
            .entry(row.id)
            .or_default()
            .push(InvocationDBResponse::from_request(id, row.id, invocation.clone()));
        Ok((row, id))
    }

    async fn list_functions(&self, project_id: ProjectId) -> Result<Vec<FunctionDBResponse>> {
        let tables = self.tables.read().await;
        let mut functions: Vec<_> = tables
            .functions
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(functions)
    }

    async fn get_function(&self, project_id: ProjectId, id: FunctionId) -> Result<Option<FunctionDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.functions.get(&id).filter(|f| f.project_id == project_id).cloned())
    }

    async fn invocations_since(&self, function_id: FunctionId, since: DateTime<Utc>, limit: i64) -> Result<Vec<InvocationDBResponse>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<_> = tables
            .invocations
            .get(&function_id)
            .map(|rows| rows.iter().filter(|r| r.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn invocation(timestamp: DateTime<Utc>) -> InvocationCreateDBRequest {
        InvocationCreateDBRequest {
            invocation_id: Uuid::new_v4().to_string(),
            request_id: None,
            timestamp,
            cold_start: false,
            init_duration_ms: None,
            execution_duration_ms: 5.0,
            billed_duration_ms: None,
            memory_used_mb: None,
            memory_allocated_mb: None,
            module_timings: BTreeMap::new(),
            runtime_version: None,
            architecture: None,
            received_at: Utc::now(),
        }
    }

    fn upsert(project_id: ProjectId, name: &str, seen_at: DateTime<Utc>) -> FunctionUpsertDBRequest {
        FunctionUpsertDBRequest {
            project_id,
            name: name.to_string(),
            runtime: Some("nodejs20.x".to_string()),
            region: None,
            memory_mb: Some(256),
            seen_at,
        }
    }

    async fn store_with_project() -> (InMemoryStore, ProjectDBResponse) {
        let store = InMemoryStore::new();
        let project = store
            .create_project(&ProjectCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
            })
            .await
            .unwrap();
        (store, project)
    }

    #[tokio::test]
    async fn test_project_slug_is_unique() {
        let (store, _) = store_with_project().await;
        let err = store
            .create_project(&ProjectCreateDBRequest {
                name: "Other".to_string(),
                slug: "acme".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert!(store.get_project_by_slug("acme").await.unwrap().is_some());
        assert!(store.get_project_by_slug("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_key_lifecycle() {
        let (store, project) = store_with_project().await;
        let request = ApiKeyCreateDBRequest {
            project_id: project.id,
            label: "default".to_string(),
            key_hash: "a".repeat(64),
            key_prefix: "csa_abcd".to_string(),
        };
        let key = store.create_api_key(&request).await.unwrap();
        assert!(key.is_active);
        assert!(matches!(
            store.create_api_key(&request).await.unwrap_err(),
            DbError::UniqueViolation { .. }
        ));

        let used_at = Utc::now();
        store.touch_api_key(key.id, used_at).await.unwrap();
        let found = store.get_api_key_by_hash(&"a".repeat(64)).await.unwrap().unwrap();
        assert_eq!(found.last_used_at, Some(used_at));

        assert!(store.deactivate_api_key(key.id).await.unwrap());
        assert!(!store.deactivate_api_key(key.id).await.unwrap());
        let found = store.get_api_key_by_hash(&"a".repeat(64)).await.unwrap().unwrap();
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn test_api_key_requires_project() {
        let store = InMemoryStore::new();
        let err = store
            .create_api_key(&ApiKeyCreateDBRequest {
                project_id: Uuid::new_v4(),
                label: "default".to_string(),
                key_hash: "b".repeat(64),
                key_prefix: "csa_bbbb".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_metadata_and_moves_last_seen() {
        let (store, project) = store_with_project().await;
        let t0 = Utc::now();

        let (first, _) = store
            .ingest_invocation(&upsert(project.id, "checkout", t0), &invocation(t0))
            .await
            .unwrap();
        let mut later = upsert(project.id, "checkout", t0 + Duration::seconds(10));
        later.runtime = Some("python3.12".to_string());
        let (second, _) = store.ingest_invocation(&later, &invocation(t0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.runtime.as_deref(), Some("nodejs20.x"));
        assert_eq!(second.first_seen_at, t0);
        assert_eq!(second.last_seen_at, t0 + Duration::seconds(10));
        assert_eq!(store.list_functions(project.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_ingest_creates_one_function() {
        let (store, project) = store_with_project().await;
        let store = Arc::new(store);
        let now = Utc::now();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .ingest_invocation(&upsert(project.id, "checkout", now), &invocation(now))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let functions = store.list_functions(project.id).await.unwrap();
        assert_eq!(functions.len(), 1);
        let rows = store
            .invocations_since(functions[0].id, now - Duration::minutes(1), 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 16);
    }

    #[tokio::test]
    async fn test_invocations_since_filters_orders_and_limits() {
        let (store, project) = store_with_project().await;
        let now = Utc::now();
        let mut function_id = None;
        for minutes_ago in [90, 30, 10, 20] {
            let (function, _) = store
                .ingest_invocation(
                    &upsert(project.id, "checkout", now),
                    &invocation(now - Duration::minutes(minutes_ago)),
                )
                .await
                .unwrap();
            function_id = Some(function.id);
        }
        let function_id = function_id.unwrap();

        let rows = store
            .invocations_since(function_id, now - Duration::hours(1), 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].timestamp, now - Duration::minutes(10));
        assert_eq!(rows[2].timestamp, now - Duration::minutes(30));

        let limited = store
            .invocations_since(function_id, now - Duration::hours(1), 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].timestamp, now - Duration::minutes(20));
    }

    #[tokio::test]
    async fn test_functions_are_project_scoped() {
        let (store, acme) = store_with_project().await;
        let other = store
            .create_project(&ProjectCreateDBRequest {
                name: "Other".to_string(),
                slug: "other".to_string(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        let (function, _) = store
            .ingest_invocation(&upsert(acme.id, "checkout", now), &invocation(now))
            .await
            .unwrap();
        store
            .ingest_invocation(&upsert(other.id, "checkout", now), &invocation(now))
            .await
            .unwrap();

        assert!(store.get_function(acme.id, function.id).await.unwrap().is_some());
        assert!(store.get_function(other.id, function.id).await.unwrap().is_none());
        assert_eq!(store.list_functions(acme.id).await.unwrap().len(), 1);
        assert_eq!(store.list_functions(other.id).await.unwrap().len(), 1);
    }
}
