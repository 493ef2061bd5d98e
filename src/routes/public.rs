use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable with or without a session: the login gateway, logout,
/// the root redirector and the health check. None of them touch user data
/// beyond the credentials posted to login.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/login
        // Authenticates, rotates the session id and writes the identity claims.
        .route("/auth/login", post(handlers::login))
        // POST /auth/logout
        // Destroys the session. Safe to call without one.
        .route("/auth/logout", post(handlers::logout))
        // GET /
        // Redirects to the home page of the session's surface, or to login.
        .route("/", get(handlers::root_redirect))
}
