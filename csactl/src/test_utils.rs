//! Test utilities shared by unit and HTTP tests.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::auth::api_key::{IssuedApiKey, issue_api_key};
use crate::config::Config;
use crate::db::InMemoryStore;
use crate::limits::RateLimiter;
use crate::{AppState, Application};

/// Defaults with metrics off, so tests do not race on the global Prometheus recorder.
pub fn create_test_config() -> Config {
    Config {
        enable_metrics: false,
        ..Config::default()
    }
}

pub fn create_test_app_state(config: Config) -> AppState {
    AppState::builder()
        .limiter(Arc::new(RateLimiter::new(&config.rate_limits)))
        .config(Arc::new(config))
        .store(Arc::new(InMemoryStore::new()))
        .build()
}

/// An in-memory application wrapped in a test server, plus its state for direct store access.
pub fn create_test_app(config: Config) -> (TestServer, AppState) {
    let app = Application::with_store(config, Arc::new(InMemoryStore::new())).expect("Failed to create application");
    let state = app.state().clone();
    (app.into_test_server(), state)
}

pub async fn create_test_key(state: &AppState, project_slug: &str) -> IssuedApiKey {
    issue_api_key(state.store.as_ref(), project_slug, None, "test")
        .await
        .expect("Failed to issue test API key")
}

/// A valid envelope; callers override fields as needed.
pub fn envelope(function_name: &str, cold_start: bool, timestamp: DateTime<Utc>) -> Value {
    json!({
        "function_name": function_name,
        "timestamp": timestamp.to_rfc3339(),
        "cold_start": cold_start,
        "init_duration_ms": if cold_start { json!(500.0) } else { Value::Null },
        "execution_duration_ms": 25.0,
        "memory_allocated_mb": 512,
        "module_timings": if cold_start { json!({"aws-sdk": 250.0, "lodash": 20.0}) } else { json!({}) },
        "runtime_version": "nodejs20.x",
        "architecture": "x86_64"
    })
}
