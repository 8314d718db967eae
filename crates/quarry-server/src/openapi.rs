use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Quarry API",
        version = "0.1.0",
        description = "Rate-limited, cached web content extraction to Markdown."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::batch,
        crate::routes::metrics,
        crate::routes::clear_cache,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeOptionsDto,
        crate::dto::ScrapeRequest,
        crate::dto::ScrapeResponse,
        crate::dto::ScrapeDataResponse,
        crate::dto::ScrapeErrorResponse,
        crate::dto::ScrapeMetadataResponse,
        crate::dto::BatchRequest,
        crate::dto::BatchResponse,
        crate::dto::BatchSummaryResponse,
        crate::dto::MetricsResponse,
        crate::dto::ClearCacheResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "Single and batch content extraction"),
        (name = "service", description = "Metrics and cache management"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via QUARRY_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
