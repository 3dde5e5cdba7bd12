use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::test_utils::{create_test_app, create_test_config, create_test_key, envelope};

#[tokio::test]
#[test_log::test]
async fn test_health_needs_no_key() {
    let (server, _) = create_test_app(create_test_config());

    let response = server.get("/api/v1/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_ingest_requires_valid_key() {
    let (server, _) = create_test_app(create_test_config());
    let body = envelope("checkout", true, Utc::now());

    let response = server.post("/api/v1/ingest").json(&body).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error_code"], "AUTHENTICATION_ERROR");

    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", "csa_00000000000000000000000000000000")
        .json(&body)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_key_is_rejected() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;
    state.store.deactivate_api_key(key.key.id).await.unwrap();

    let response = server
        .get("/api/v1/functions")
        .add_header("x-api-key", &key.plaintext)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[test_log::test]
async fn test_ingest_then_query_function() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;
    let now = Utc::now();

    let mut cold = envelope("checkout", true, now - Duration::minutes(5));
    cold["invocation_id"] = json!("inv-cold");
    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&cold)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"status": "ok", "invocation_id": "inv-cold"}));

    for minutes in 1..4 {
        server
            .post("/api/v1/ingest")
            .add_header("x-api-key", &key.plaintext)
            .json(&envelope("checkout", false, now - Duration::minutes(minutes)))
            .await
            .assert_status_ok();
    }

    let response = server
        .get("/api/v1/functions")
        .add_header("x-api-key", &key.plaintext)
        .await;
    response.assert_status_ok();
    let list: Value = response.json();
    assert_eq!(list["window_secs"], 86_400);
    let functions = list["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0]["name"], "checkout");
    assert_eq!(functions[0]["memory_mb"], 512);
    assert_eq!(functions[0]["stats"]["total_invocations"], 4);
    assert_eq!(functions[0]["stats"]["cold_starts"], 1);
    assert_eq!(functions[0]["stats"]["cold_start_rate"], 0.25);

    let id = functions[0]["id"].as_str().unwrap();
    let response = server
        .get(&format!("/api/v1/functions/{id}"))
        .add_header("x-api-key", &key.plaintext)
        .await;
    response.assert_status_ok();
    let detail: Value = response.json();
    assert_eq!(detail["function"]["id"], id);
    assert_eq!(detail["stats"]["init_duration"]["p50"], 500.0);
    assert_eq!(detail["modules"][0]["module"], "aws-sdk");
    assert_eq!(detail["modules"][0]["count"], 1);
    // aws-sdk at 250 ms is over 10% of a 500 ms init, lodash at 20 ms is not
    let recommendations = detail["recommendations"].as_array().unwrap();
    assert_eq!(recommendations.len(), 1);
    assert_eq!(recommendations[0]["module"], "aws-sdk");
    assert_eq!(recommendations[0]["potential_savings_ms"], 250.0);
}

#[tokio::test]
async fn test_ingest_generates_missing_invocation_id() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;

    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&envelope("checkout", false, Utc::now()))
        .await;
    response.assert_status_ok();
    let id = response.json::<Value>()["invocation_id"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());
}

#[tokio::test]
async fn test_ingest_validation_errors() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;

    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&json!({"function_name": "", "cold_start": "no"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    let fields: Vec<_> = body["detail"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["function_name", "timestamp", "cold_start", "execution_duration_ms"]);

    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .text("{not json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"][0]["field"], "body");
}

#[tokio::test]
async fn test_batch_reports_per_item_results() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;
    let now = Utc::now();

    let mut bad = envelope("checkout", false, now);
    bad["timestamp"] = json!("not a time");
    let body = json!({
        "invocations": [
            envelope("checkout", true, now),
            bad,
            envelope("checkout", false, now),
            {"function_name": "orders"},
            envelope("orders", true, now),
        ]
    });

    let response = server
        .post("/api/v1/ingest/batch")
        .add_header("x-api-key", &key.plaintext)
        .json(&body)
        .await;
    response.assert_status_ok();
    let result: Value = response.json();
    assert_eq!(result["status"], "ok");
    assert_eq!(result["processed"], 3);
    assert_eq!(result["failed"], 2);
    assert_eq!(result["errors"][0]["index"], 1);
    assert_eq!(result["errors"][0]["detail"][0]["field"], "timestamp");
    assert_eq!(result["errors"][1]["index"], 3);

    let functions = state.store.list_functions(key.project.id).await.unwrap();
    let names: Vec<_> = functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["checkout", "orders"]);
}

#[tokio::test]
async fn test_batch_over_limit_rejected_whole() {
    let mut config = create_test_config();
    config.ingest.max_batch_size = 2;
    let (server, state) = create_test_app(config);
    let key = create_test_key(&state, "acme").await;
    let now = Utc::now();

    let body = json!({"invocations": [envelope("a", true, now), envelope("a", false, now), envelope("a", false, now)]});
    let response = server
        .post("/api/v1/ingest/batch")
        .add_header("x-api-key", &key.plaintext)
        .json(&body)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"][0]["field"], "invocations");
    assert!(state.store.list_functions(key.project.id).await.unwrap().is_empty());

    let response = server
        .post("/api/v1/ingest/batch")
        .add_header("x-api-key", &key.plaintext)
        .json(&json!({"items": []}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_counts_once_against_rate_limit() {
    let mut config = create_test_config();
    config.rate_limits.ingest.capacity = 1;
    let (server, state) = create_test_app(config);
    let key = create_test_key(&state, "acme").await;
    let now = Utc::now();

    let items: Vec<Value> = (0..50).map(|_| envelope("checkout", false, now)).collect();
    let response = server
        .post("/api/v1/ingest/batch")
        .add_header("x-api-key", &key.plaintext)
        .json(&json!({ "invocations": items }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["processed"], 50);

    let response = server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&envelope("checkout", false, now))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json::<Value>()["error_code"], "RATE_LIMIT_ERROR");
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_query_bucket_is_separate_from_ingest() {
    let mut config = create_test_config();
    config.rate_limits.ingest.capacity = 1;
    config.rate_limits.query.capacity = 2;
    let (server, state) = create_test_app(config);
    let key = create_test_key(&state, "acme").await;

    server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&envelope("checkout", false, Utc::now()))
        .await
        .assert_status_ok();

    for _ in 0..2 {
        server
            .get("/api/v1/functions")
            .add_header("x-api-key", &key.plaintext)
            .await
            .assert_status_ok();
    }
    server
        .get("/api/v1/functions")
        .add_header("x-api-key", &key.plaintext)
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_function_lookup_is_project_scoped() {
    let (server, state) = create_test_app(create_test_config());
    let acme = create_test_key(&state, "acme").await;
    let other = create_test_key(&state, "other").await;

    server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &acme.plaintext)
        .json(&envelope("checkout", true, Utc::now()))
        .await
        .assert_status_ok();
    let function_id = state.store.list_functions(acme.project.id).await.unwrap()[0].id;

    let response = server
        .get(&format!("/api/v1/functions/{function_id}"))
        .add_header("x-api-key", &other.plaintext)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error_code"], "NOT_FOUND");

    let response = server
        .get(&format!("/api/v1/functions/{}", Uuid::new_v4()))
        .add_header("x-api-key", &acme.plaintext)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = server
        .get("/api/v1/functions")
        .add_header("x-api-key", &other.plaintext)
        .await;
    assert!(response.json::<Value>()["functions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_window_limits_rows() {
    let (server, state) = create_test_app(create_test_config());
    let key = create_test_key(&state, "acme").await;
    let now = Utc::now();

    for hours in [0, 2, 30] {
        server
            .post("/api/v1/ingest")
            .add_header("x-api-key", &key.plaintext)
            .json(&envelope("checkout", true, now - Duration::hours(hours) - Duration::minutes(1)))
            .await
            .assert_status_ok();
    }

    let total = |body: Value| body["functions"][0]["stats"]["total_invocations"].clone();

    let response = server
        .get("/api/v1/functions")
        .add_query_param("window", "1h")
        .add_header("x-api-key", &key.plaintext)
        .await;
    assert_eq!(total(response.json()), 1);

    let response = server
        .get("/api/v1/functions")
        .add_header("x-api-key", &key.plaintext)
        .await;
    assert_eq!(total(response.json()), 2);

    let response = server
        .get("/api/v1/functions")
        .add_query_param("window", "7d")
        .add_header("x-api-key", &key.plaintext)
        .await;
    assert_eq!(total(response.json()), 3);

    let response = server
        .get("/api/v1/functions")
        .add_query_param("window", "90d")
        .add_header("x-api-key", &key.plaintext)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"][0]["field"], "window");
}

#[tokio::test]
async fn test_openapi_document_served() {
    let (server, _) = create_test_app(create_test_config());
    let response = server.get("/api/v1/openapi.json").await;
    response.assert_status_ok();
    let doc: Value = response.json();
    assert!(doc["paths"]["/ingest/batch"].is_object());
    assert!(doc["components"]["securitySchemes"]["ApiKey"].is_object());

    server.get("/api/docs").await.assert_status_ok();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_ingest_counters() {
    let config = crate::config::Config {
        enable_metrics: true,
        ..create_test_config()
    };
    let (server, state) = create_test_app(config);
    let key = create_test_key(&state, "acme").await;

    server
        .post("/api/v1/ingest")
        .add_header("x-api-key", &key.plaintext)
        .json(&envelope("checkout", true, Utc::now()))
        .await
        .assert_status_ok();

    let response = server.get("/internal/metrics").await;
    response.assert_status_ok();
    let text = response.text();
    assert!(text.contains("csactl_invocations_ingested_total"));
}

#[tokio::test]
async fn test_list_covers_more_functions_than_load_concurrency() {
    let mut config = create_test_config();
    config.aggregation.list_concurrency = 2;
    let (server, state) = create_test_app(config);
    let key = create_test_key(&state, "acme").await;

    for name in ["orders", "billing", "search", "auth", "checkout"] {
        server
            .post("/api/v1/ingest")
            .add_header("x-api-key", &key.plaintext)
            .json(&envelope(name, true, Utc::now()))
            .await
            .assert_status_ok();
    }

    let response = server
        .get("/api/v1/functions")
        .add_header("x-api-key", &key.plaintext)
        .await;
    response.assert_status_ok();
    let list: Value = response.json();
    let functions = list["functions"].as_array().unwrap();
    let names: Vec<_> = functions.iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["auth", "billing", "checkout", "orders", "search"]);
    assert!(functions.iter().all(|f| f["stats"]["cold_starts"] == 1));
}
