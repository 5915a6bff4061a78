use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, Uri, uri::PathAndQuery},
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod password;
pub mod repository;
pub mod validators;

// Browser UI.
pub mod pages;
pub mod views;

// Routing segregation (Public, Authenticated, Admin, API).
pub mod routes;
use routes::{admin, api, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use memory::InMemoryRepository;
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for the JSON API, served at `/api-docs/openapi.json`
/// (administrators only, like the Swagger UI itself).
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_vms, handlers::create_vm, handlers::get_vm, handlers::update_vm,
        handlers::delete_vm, handlers::list_users, handlers::create_user, handlers::search_users,
        handlers::get_user, handlers::set_user_blocked, handlers::get_me, handlers::update_me,
    ),
    components(
        schemas(
            models::VmView, models::UserView, models::VmList, models::UserList,
            models::CreateVmRequest, models::UpdateVmRequest, models::CreateUserRequest,
            models::BlockRequest, models::ProfileUpdateRequest,
        )
    ),
    tags(
        (name = "vm-manager", description = "Virtual machine inventory API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// Shared by every request: the repository and the immutable configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub config: AppConfig,
}

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the page, API and documentation routes, then wraps them in the
/// observability layers and the case-insensitive path rewrite.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // Swagger UI and the OpenAPI JSON are only for administrators.
    let docs: Router<AppState> = Router::from(
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route_layer(middleware::from_fn_with_state(
        state.clone(),
        pages::require_admin_page,
    ));

    let base_router = Router::new()
        .merge(docs)
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest("/admin", admin::admin_routes())
        .nest("/api/v1", api::api_routes())
        .with_state(state);

    let app = base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors);

    // Routing happens after the rewrite, so the rewrite must wrap the whole router.
    Router::new()
        .fallback_service(app)
        .layer(middleware::map_request(lowercase_path))
}

/// Lowercases the request path so `/VMS/Create` reaches `/vms/create`.
/// The query string is left untouched.
async fn lowercase_path(mut request: Request) -> Request {
    let uri = request.uri();
    if !uri.path().bytes().any(|b| b.is_ascii_uppercase()) {
        return request;
    }

    let lowered = match uri.query() {
        Some(query) => format!("{}?{}", uri.path().to_ascii_lowercase(), query),
        None => uri.path().to_ascii_lowercase(),
    };
    let mut parts = uri.clone().into_parts();
    match PathAndQuery::try_from(lowered) {
        Ok(path_and_query) => parts.path_and_query = Some(path_and_query),
        Err(_) => return request,
    }
    if let Ok(rewritten) = Uri::from_parts(parts) {
        *request.uri_mut() = rewritten;
    }
    request
}

/// trace_span_logger
///
/// Span for each request carrying the method, URI and `x-request-id`, so every
/// log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
