use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Panel Router Module
///
/// Nested under `/panel`. Layered with `require_session` and then
/// `require_panel`, so a Dashboard user is refused with 403 before any
/// handler runs.
pub fn panel_routes() -> Router<AppState> {
    Router::new()
        // GET /panel/home
        .route("/home", get(handlers::panel_home))
        // GET/POST /panel/users
        // Paginated listing (ListParams on the query string) and account creation.
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        // PUT /panel/users/status
        // Bulk status change for every user matching a condition.
        .route("/users/status", put(handlers::bulk_update_status))
        // POST /panel/users/bulk-delete
        // Row-by-row soft delete of every user matching a condition.
        .route("/users/bulk-delete", post(handlers::bulk_delete_users))
        // GET/PUT/DELETE /panel/users/{id}
        // Delete is a soft delete stamped with the acting user.
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
}
