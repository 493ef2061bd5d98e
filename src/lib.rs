use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use tower_sessions::{SessionManagerLayer, SessionStore};
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

// Data layer: the store contract, its backends, and the generic repository on top.
pub mod query_params;
pub mod repository;
pub mod scope;
pub mod search;
pub mod store;

// Identity: password hashing, the auth service, sessions and the middleware using them.
pub mod auth;
pub mod auth_service;
pub mod password;
pub mod session;

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

// Module for routing segregation (Public, Authenticated, Panel, Dashboard).
pub mod routes;
use routes::{authenticated, dashboard, panel, public};

// --- Public Re-exports ---

pub use auth_service::{AuthService, AuthState};
pub use config::AppConfig;
pub use repository::{BaseRepository, Repository, RepositoryState};
pub use scope::RequestScope;
pub use store::{MemoryStore, PostgresStore, StoreState};

use models::User;

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and the request/response
/// schemas into the OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::logout, handlers::profile, handlers::update_password,
        handlers::panel_home, handlers::dashboard_home, handlers::list_users,
        handlers::get_user, handlers::create_user, handlers::update_user,
        handlers::delete_user, handlers::bulk_update_status, handlers::bulk_delete_users
    ),
    components(
        schemas(
            models::UserType, models::UserProfile, models::LoginRequest,
            models::UpdatePasswordRequest, models::CreateUserRequest, models::UpdateUserRequest,
            models::UserCondition, models::BulkStatusRequest, models::BulkResult,
            models::AuthResponse, models::HomeResponse, error::ErrorResponse,
        )
    ),
    tags(
        (name = "admin-panel", description = "Admin Panel API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cloneable container for everything handlers and middleware
/// need. Built once in `main` and shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: the audited CRUD engine for the `users` table.
    pub users: RepositoryState<User>,
    /// Identity Layer: credential checks and password changes.
    pub auth: AuthState,
    /// Configuration: The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// These let handlers pull only the component they need out of AppState.

impl FromRef<AppState> for RepositoryState<User> {
    fn from_ref(app_state: &AppState) -> RepositoryState<User> {
        app_state.users.clone()
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> AuthState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure, the access layers, and the observability
/// stack. The session layer is passed in so tests can run the exact router
/// against an in-memory session store.
pub fn create_router<Store>(state: AppState, sessions: SessionManagerLayer<Store>) -> Router
where
    Store: SessionStore + Clone,
{
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Protected Routers
    // Route layers run outermost-last: `require_session` resolves the identity
    // first, then the surface guard checks its type.
    let authenticated_router = authenticated::authenticated_routes().route_layer(
        middleware::from_fn_with_state(state.clone(), auth::require_session),
    );

    let panel_router = panel::panel_routes()
        .route_layer(middleware::from_fn(auth::require_panel))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let dashboard_router = dashboard::dashboard_routes()
        .route_layer(middleware::from_fn(auth::require_dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    // 3. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated_router)
        .nest("/panel", panel_router)
        .nest("/dashboard", dashboard_router)
        .with_state(state);

    // 4. Session, Observability and Correlation Layers
    base_router
        // Every route can resolve its session, public ones included.
        .layer(sessions)
        .layer(
            ServiceBuilder::new()
                // Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // Request Tracing: one span per request, carrying the request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // Request ID Propagation: echo x-request-id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span used by `TraceLayer`, tagging it with the
/// `x-request-id` so every log line of one request can be correlated.
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
