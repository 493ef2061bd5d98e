use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Authenticated Router Module
///
/// Routes for any logged-in user, whatever their surface. Every handler here
/// relies on `require_session` being layered on this router, which provides
/// the `CurrentUser` and the actor-carrying `RequestScope`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /auth/profile
        // The current user's profile, re-read from the store.
        .route("/auth/profile", get(handlers::profile))
        // PUT /auth/password
        // Changes the password and ends the session on success.
        .route("/auth/password", put(handlers::update_password))
}
