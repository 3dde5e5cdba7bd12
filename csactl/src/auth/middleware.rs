use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, trace, warn};

use super::api_key::hash_api_key;
use crate::{
    AppState,
    errors::{Error, Result},
    limits::Bucket,
    types::{ApiKeyId, ProjectId, abbrev_uuid},
};

pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated credential, inserted as a request extension for handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub project_id: ProjectId,
    pub api_key_id: ApiKeyId,
}

/// Resolve the `X-API-Key` header to an active key and charge one token from `bucket`.
///
/// Runs before the body is read, so rejected requests never reach parsing or storage.
pub(crate) async fn authenticate(state: &AppState, bucket: Bucket, mut request: Request) -> Result<Request> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(Error::Unauthenticated {
            message: Some("Missing X-API-Key header".to_string()),
        })?;

    let key = state
        .store
        .get_api_key_by_hash(&hash_api_key(presented))
        .await?
        .ok_or(Error::Unauthenticated { message: None })?;
    if !key.is_active {
        debug!(key_id = %abbrev_uuid(&key.id), "Rejected inactive API key");
        return Err(Error::Unauthenticated { message: None });
    }

    state.limiter.check(key.id, bucket)?;

    if let Err(e) = state.store.touch_api_key(key.id, Utc::now()).await {
        warn!(key_id = %abbrev_uuid(&key.id), "Failed to record API key use: {e}");
    }

    trace!(key_id = %abbrev_uuid(&key.id), project_id = %abbrev_uuid(&key.project_id), %bucket, "Authenticated request");

    request.extensions_mut().insert(Caller {
        project_id: key.project_id,
        api_key_id: key.id,
    });
    Ok(request)
}

/// Guards the ingest routes, drawing from the ingest bucket.
pub async fn ingest_guard(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let request = authenticate(&state, Bucket::Ingest, request).await?;
    Ok(next.run(request).await)
}

/// Guards the query routes, drawing from the query bucket.
pub async fn query_guard(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let request = authenticate(&state, Bucket::Query, request).await?;
    Ok(next.run(request).await)
}
