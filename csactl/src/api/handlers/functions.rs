use axum::{
    Extension,
    extract::{Path, Query, State},
    response::Json,
};

use crate::{
    AppState,
    aggregation::{FunctionReport, load_window, resolve_window, summarize_functions},
    api::models::functions::{FunctionDetailResponse, FunctionListResponse, FunctionSummary, WindowQuery},
    auth::middleware::Caller,
    errors::{Error, ErrorResponse, Result},
    types::FunctionId,
};

/// List the project's functions with cold start statistics.
#[utoipa::path(
    get,
    path = "/functions",
    tag = "functions",
    summary = "List functions",
    params(WindowQuery),
    responses(
        (status = 200, description = "Functions ordered by name", body = FunctionListResponse),
        (status = 400, description = "Invalid window", body = ErrorResponse),
        (status = 401, description = "Missing, unknown or inactive API key", body = ErrorResponse),
        (status = 429, description = "Query rate limit exceeded", body = ErrorResponse),
    ),
    security(("ApiKey" = []))
)]
pub async fn list_functions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<FunctionListResponse>> {
    let config = &state.config.aggregation;
    let window = resolve_window(query.window.as_deref(), config)?;
    let functions = state.store.list_functions(caller.project_id).await?;

    let functions = summarize_functions(state.store.as_ref(), functions, window, config)
        .await?
        .into_iter()
        .map(|(function, stats)| FunctionSummary {
            function: function.into(),
            stats,
        })
        .collect();

    Ok(Json(FunctionListResponse {
        window_secs: window.as_secs(),
        functions,
    }))
}

/// Statistics, per-dependency breakdown and recommendations for one function.
#[utoipa::path(
    get,
    path = "/functions/{id}",
    tag = "functions",
    summary = "Get function details",
    params(
        ("id" = String, Path, description = "Function ID (UUID)"),
        WindowQuery
    ),
    responses(
        (status = 200, description = "Function report", body = FunctionDetailResponse),
        (status = 400, description = "Invalid window", body = ErrorResponse),
        (status = 401, description = "Missing, unknown or inactive API key", body = ErrorResponse),
        (status = 404, description = "No such function in this project", body = ErrorResponse),
        (status = 429, description = "Query rate limit exceeded", body = ErrorResponse),
    ),
    security(("ApiKey" = []))
)]
pub async fn get_function(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<FunctionId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<FunctionDetailResponse>> {
    let config = &state.config.aggregation;
    let window = resolve_window(query.window.as_deref(), config)?;
    let function = state
        .store
        .get_function(caller.project_id, id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Function".to_string(),
            id: id.to_string(),
        })?;

    let rows = load_window(state.store.as_ref(), function.id, window, config).await?;
    let report = FunctionReport::from_rows(&rows, config);
    Ok(Json(FunctionDetailResponse::new(function, window.as_secs(), report)))
}
