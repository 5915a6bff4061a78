use crate::{AppState, pages};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// Moderation pages. Handlers check `is_admin` through the gate and answer
/// `403` to regular users.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // Every account with a block/unblock button (not shown for administrators).
        .route("/users", get(pages::admin_users))
        // POST /admin/users/{id}/toggle-block
        // Flips the block flag; refused for administrator targets.
        .route("/users/{id}/toggle-block", post(pages::admin_toggle_block))
        // GET /admin/vms
        // Every VM, deleted ones included, with the emails of its owners.
        .route("/vms", get(pages::admin_vms))
}
