use axum::{
    Extension,
    body::Bytes,
    extract::State,
    response::Json,
};
use serde_json::Value;

use crate::{
    AppState,
    api::models::ingest::{BatchIngestRequest, BatchIngestResponse, IngestResponse, InvocationEnvelope},
    auth::middleware::Caller,
    errors::{Error, ErrorResponse, Result},
    ingest::{ingest_batch, ingest_one},
};

fn parse_body(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::invalid("body", format!("invalid JSON: {e}")))
}

/// Record a single invocation.
#[utoipa::path(
    post,
    path = "/ingest",
    tag = "ingest",
    summary = "Ingest one invocation",
    request_body = InvocationEnvelope,
    responses(
        (status = 200, description = "Invocation stored", body = IngestResponse),
        (status = 400, description = "Malformed envelope", body = ErrorResponse),
        (status = 401, description = "Missing, unknown or inactive API key", body = ErrorResponse),
        (status = 429, description = "Ingest rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    ),
    security(("ApiKey" = []))
)]
pub async fn ingest(State(state): State<AppState>, Extension(caller): Extension<Caller>, body: Bytes) -> Result<Json<IngestResponse>> {
    let body = parse_body(&body)?;
    let invocation_id = ingest_one(state.store.as_ref(), caller.project_id, &body).await?;
    Ok(Json(IngestResponse::ok(invocation_id)))
}

/// Record many invocations in one call.
///
/// Counts once against authentication and the rate limit. Each envelope succeeds or fails on
/// its own; failures are reported by index.
#[utoipa::path(
    post,
    path = "/ingest/batch",
    tag = "ingest",
    summary = "Ingest a batch of invocations",
    request_body = BatchIngestRequest,
    responses(
        (status = 200, description = "Batch processed, see per-item errors", body = BatchIngestResponse),
        (status = 400, description = "Body is not a batch, or the batch is too large", body = ErrorResponse),
        (status = 401, description = "Missing, unknown or inactive API key", body = ErrorResponse),
        (status = 429, description = "Ingest rate limit exceeded", body = ErrorResponse),
    ),
    security(("ApiKey" = []))
)]
pub async fn ingest_batch_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<Json<BatchIngestResponse>> {
    let mut body = parse_body(&body)?;
    let items = match body.get_mut("invocations").map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(Error::invalid("invocations", "must be an array")),
        None => return Err(Error::invalid("invocations", "field required")),
    };

    let max = state.config.ingest.max_batch_size;
    if items.len() > max {
        return Err(Error::invalid(
            "invocations",
            format!("batch of {} exceeds the maximum of {max}", items.len()),
        ));
    }

    let outcome = ingest_batch(
        state.store.as_ref(),
        caller.project_id,
        items,
        state.config.ingest.batch_concurrency,
    )
    .await;
    Ok(Json(outcome.into()))
}
