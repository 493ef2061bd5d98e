use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Dashboard Router Module
///
/// Nested under `/dashboard`, guarded by `require_dashboard`.
pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        // GET /dashboard/home
        .route("/home", get(handlers::dashboard_home))
}
