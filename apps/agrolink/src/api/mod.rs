//! # AgroLink HTTP API Module
//!
//! REST API over the pipeline engine, served with axum.
//!
//! ## Endpoints
//!
//! Stages and their checklist items:
//! - `GET /etapas`, `GET /etapas/all`, `POST /etapas`
//! - `PUT /etapas/{id}`, `DELETE /etapas/{id}`, `PUT /etapas/{a}/swap/{b}`
//! - `GET /etapas/{id}/requisitos?project_type=`, `POST /etapas/{id}/requisitos`
//! - `DELETE /requisitos/{id}`
//!
//! Projects:
//! - `POST /projects`, `GET /projects`, `GET /projects/{id}`
//! - `PUT /projects/{id}/next-stage`, `PUT /projects/{id}/archive`,
//!   `PUT /projects/{id}/cancel`
//! - `POST /projects/{id}/pendencia`, `PUT /projects/{id}/pendencia/{index}/resolve`
//! - `POST /projects/{id}/observacao`, `PUT /projects/{id}/documents`,
//!   `PUT /projects/{id}/contract`
//!
//! Proposals:
//! - `POST /propostas`, `GET /propostas?status=`, `GET /propostas/{id}`
//! - `PUT /propostas/{id}/converter`, `PUT /propostas/{id}/desistir`
//! - `GET /alerts/propostas?days=`
//!
//! Reports: `GET /dashboard/stats`, `GET /reports/summary`. Liveness: `GET /health`.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `AGROLINK_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `AGROLINK_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `AGROLINK_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod extract;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use middleware::{DEFAULT_RATE_LIMIT, create_rate_limiter, get_rate_limit_from_env};
// Re-exported for integration tests (via `agrolink::api::*`)
#[allow(unused_imports)]
pub use types::{
    AdvanceRequest, AlertQuery, AlertsResponse, ApiError, CancelResponse, ConversionResponse,
    CreateRequirementRequest, CreateStageRequest, ErrorResponse, HealthResponse,
    ObservacaoRequest, PendenciaRequest, PendenciaResponse, ProjectListQuery, ProposalListQuery,
    ReasonRequest, RequirementsQuery, SwapResponse, UpdateStageRequest, status_for,
};

use crate::config::ServerConfig;
use crate::documents::{DocumentPurger, FsDocumentPurger};
use agrolink_core::{Pipeline, PipelineError};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub purger: Arc<dyn DocumentPurger>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// State with a filesystem purger rooted at `config.upload_dir`.
    #[must_use]
    pub fn new(pipeline: Pipeline, config: ServerConfig) -> Self {
        let purger = FsDocumentPurger::new(config.upload_dir.clone());
        Self::with_purger(pipeline, config, Arc::new(purger))
    }

    #[must_use]
    pub fn with_purger(
        pipeline: Pipeline,
        config: ServerConfig,
        purger: Arc<dyn DocumentPurger>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            purger,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build the CORS layer from `AGROLINK_CORS_ORIGINS`.
///
/// - `*`: any origin
/// - unset: localhost only
/// - otherwise: the comma-separated origins that parse as header values
fn build_cors_layer() -> CorsLayer {
    match std::env::var("AGROLINK_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (AGROLINK_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!("CORS: Allowing origin: {}", origin);
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in AGROLINK_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(CORS_METHODS)
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No AGROLINK_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// CORS layer for the local dashboard dev servers.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(CORS_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set AGROLINK_API_KEY environment variable to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        // Stages
        .route(
            "/etapas",
            get(handlers::list_stages_handler).post(handlers::create_stage_handler),
        )
        .route("/etapas/all", get(handlers::list_all_stages_handler))
        .route(
            "/etapas/{id}",
            put(handlers::update_stage_handler).delete(handlers::deactivate_stage_handler),
        )
        .route("/etapas/{a}/swap/{b}", put(handlers::swap_stages_handler))
        .route(
            "/etapas/{id}/requisitos",
            get(handlers::list_requirements_handler).post(handlers::create_requirement_handler),
        )
        .route(
            "/requisitos/{id}",
            delete(handlers::deactivate_requirement_handler),
        )
        // Projects
        .route(
            "/projects",
            get(handlers::list_projects_handler).post(handlers::create_project_handler),
        )
        .route("/projects/{id}", get(handlers::get_project_handler))
        .route("/projects/{id}/next-stage", put(handlers::advance_handler))
        .route("/projects/{id}/archive", put(handlers::archive_handler))
        .route("/projects/{id}/cancel", put(handlers::cancel_handler))
        .route(
            "/projects/{id}/pendencia",
            post(handlers::add_pendencia_handler),
        )
        .route(
            "/projects/{id}/pendencia/{index}/resolve",
            put(handlers::resolve_pendencia_handler),
        )
        .route(
            "/projects/{id}/observacao",
            post(handlers::add_observacao_handler),
        )
        .route(
            "/projects/{id}/documents",
            put(handlers::update_documents_handler),
        )
        .route(
            "/projects/{id}/contract",
            put(handlers::update_contract_handler),
        )
        // Proposals
        .route(
            "/propostas",
            get(handlers::list_proposals_handler).post(handlers::create_proposal_handler),
        )
        .route("/propostas/{id}", get(handlers::get_proposal_handler))
        .route(
            "/propostas/{id}/converter",
            put(handlers::convert_proposal_handler),
        )
        .route(
            "/propostas/{id}/desistir",
            put(handlers::withdraw_proposal_handler),
        )
        .route("/alerts/propostas", get(handlers::proposal_alerts_handler))
        // Reports
        .route("/dashboard/stats", get(handlers::dashboard_handler))
        .route("/reports/summary", get(handlers::summary_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Bind `addr` and serve until the process stops.
pub async fn run_server(
    addr: &str,
    pipeline: Pipeline,
    config: ServerConfig,
) -> Result<(), PipelineError> {
    let router = create_router(AppState::new(pipeline, config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("AgroLink HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| PipelineError::Io(format!("Server error: {}", e)))
}
