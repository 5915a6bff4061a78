use crate::{AppState, pages};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Pages for any logged-in user. Every handler takes `SessionUser`, so a request
/// without a valid session is redirected to `/login` before the handler runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(pages::profile_form).post(pages::profile))
        // GET /vms?include_deleted=1
        // The caller's VMs, soft-deleted ones hidden by default.
        .route("/vms", get(pages::vms))
        .route("/vms/create", get(pages::vm_create_form).post(pages::vm_create))
        // POST /vms/delete
        // Bulk soft-delete of the checked `vm_ids`; only the caller's active VMs change.
        .route("/vms/delete", post(pages::vms_delete))
        .route("/vms/{id}/edit", get(pages::vm_edit_form).post(pages::vm_edit))
}
