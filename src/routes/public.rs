use crate::{AppState, pages};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Reachable without a session. Login and registration redirect visitors who
/// already have one to `/vms`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        .route("/", get(pages::index))
        .route("/register", get(pages::register_form).post(pages::register))
        .route("/login", get(pages::login_form).post(pages::login))
        // GET /logout
        // Clears the session cookie; harmless without a session.
        .route("/logout", get(pages::logout))
}
