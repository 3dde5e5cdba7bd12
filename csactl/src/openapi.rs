//! OpenAPI document for `/api/v1/*`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{aggregation, api, errors, ingest};

/// Registers the `X-API-Key` header scheme referenced by the handlers.
struct ApiKeySecurityAddon;

impl Modify for ApiKeySecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "ApiKey".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-API-Key",
                    "Project API key (`csa_...`). Issue one with `csactl --create-api-key <project-slug>`.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cold Start Analyzer",
        description = "Collects per-invocation cold start telemetry from serverless functions and reports \
                       cold start rates, init duration percentiles and per-dependency load costs."
    ),
    servers(
        (url = "/api/v1", description = "Cold Start Analyzer API")
    ),
    modifiers(&ApiKeySecurityAddon),
    paths(
        api::handlers::ingest::ingest,
        api::handlers::ingest::ingest_batch_handler,
        api::handlers::functions::list_functions,
        api::handlers::functions::get_function,
        api::handlers::health::health,
    ),
    components(
        schemas(
            api::models::ingest::InvocationEnvelope,
            api::models::ingest::BatchIngestRequest,
            api::models::ingest::IngestResponse,
            api::models::ingest::BatchIngestResponse,
            api::models::functions::FunctionResponse,
            api::models::functions::FunctionSummary,
            api::models::functions::FunctionListResponse,
            api::models::functions::FunctionDetailResponse,
            api::models::health::HealthResponse,
            aggregation::FunctionStats,
            aggregation::DurationStats,
            aggregation::ModuleStats,
            aggregation::Recommendation,
            ingest::BatchItemError,
            errors::ErrorResponse,
            errors::ErrorDetail,
            errors::ErrorCode,
            errors::FieldError,
        )
    ),
    tags(
        (name = "ingest", description = "Write path used by the `coldtrace` collector."),
        (name = "functions", description = "Per-function cold start statistics and recommendations."),
        (name = "health", description = "Service liveness."),
    )
)]
pub struct ApiDoc;
