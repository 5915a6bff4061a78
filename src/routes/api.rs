use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch},
};

/// API Router Module
///
/// JSON endpoints, nested under `/api/v1`. Every handler takes `AuthUser` and
/// answers `401` without a session; admin-only endpoints answer `403` to others.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // --- VMs ---
        .route("/vms", get(handlers::list_vms).post(handlers::create_vm))
        .route(
            "/vms/{id}",
            get(handlers::get_vm)
                .patch(handlers::update_vm)
                .delete(handlers::delete_vm),
        )
        // --- Users (admin) ---
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        // Static segment; matched before `/users/{id}`.
        .route("/users/search", get(handlers::search_users))
        .route("/users/{id}", get(handlers::get_user))
        .route("/users/{id}/block", patch(handlers::set_user_blocked))
        // --- Self-service ---
        .route("/me", get(handlers::get_me).patch(handlers::update_me))
}
