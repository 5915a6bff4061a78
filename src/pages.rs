use axum::{
    Form,
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::{
    AppState,
    auth::{self, MaybeUser, SessionUser},
    error::ApiError,
    gate::{self, Actor, Denied, VmScope, VmWrite},
    handlers::{self, VmListQuery},
    models::{ActiveVm, ProfileUpdateRequest, VmSpec},
    password,
    validators::{normalize_email, text_int},
    views,
};

// --- Response Helpers ---

/// PageError
///
/// The HTML counterpart of `ApiError`: status pages instead of JSON bodies,
/// and a redirect to the login page for missing sessions.
pub struct PageError(ApiError);

impl<E: Into<ApiError>> From<E> for PageError {
    fn from(err: E) -> Self {
        PageError(err.into())
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let (title, errors) = match self.0 {
            ApiError::Unauthorized => return Redirect::to("/login").into_response(),
            ApiError::Forbidden => ("Access denied", Vec::new()),
            ApiError::NotFound => ("Not found", Vec::new()),
            ApiError::Validation(errors) => ("Invalid request", errors),
            ApiError::Conflict(message) => ("Conflict", vec![message]),
            ApiError::Database(err) => {
                tracing::error!("database error while rendering page: {:?}", err);
                ("Something went wrong", Vec::new())
            }
            ApiError::Internal(message) => {
                tracing::error!("internal error while rendering page: {}", message);
                ("Something went wrong", Vec::new())
            }
        };
        let body = views::error_message(title, &errors);
        (status, Html(views::layout(title, None, None, &body))).into_response()
    }
}

type PageResult = Result<Response, PageError>;

/// Renders a page, consuming the pending flash message if there is one.
fn render(headers: &HeaderMap, status: StatusCode, actor: Option<&Actor>, title: &str, body: &str) -> Response {
    let flash = auth::read_flash(headers);
    let html = Html(views::layout(title, actor, flash.as_deref(), body));
    if flash.is_some() {
        (status, AppendHeaders([(SET_COOKIE, auth::clear_flash_cookie())]), html).into_response()
    } else {
        (status, html).into_response()
    }
}

fn redirect_with_flash(to: &str, message: &str) -> Response {
    (
        AppendHeaders([(SET_COOKIE, auth::flash_cookie(message))]),
        Redirect::to(to),
    )
        .into_response()
}

// --- Forms ---

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VmForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ram_gb: String,
    #[serde(default)]
    pub cpu: String,
}

impl VmForm {
    fn spec(&self) -> Result<VmSpec, Vec<String>> {
        VmSpec::parse(&self.name, text_int(&self.ram_gb), text_int(&self.cpu))
    }
}

/// Every `vm_ids` value of an urlencoded body, in order.
pub fn form_vm_ids(body: &[u8]) -> Vec<String> {
    url::form_urlencoded::parse(body)
        .filter(|(key, _)| key == "vm_ids")
        .map(|(_, value)| value.into_owned())
        .collect()
}

// --- Public Pages ---

pub async fn index(MaybeUser(actor): MaybeUser, headers: HeaderMap) -> Response {
    render(&headers, StatusCode::OK, actor.as_ref(), "VM Manager", &views::index())
}

pub async fn register_form(MaybeUser(actor): MaybeUser, headers: HeaderMap) -> Response {
    if actor.is_some() {
        return Redirect::to("/vms").into_response();
    }
    let body = views::auth_form("/register", true, "", "", &[]);
    render(&headers, StatusCode::OK, None, "Register", &body)
}

/// register
///
/// Creates a regular account and logs it in.
pub async fn register(
    MaybeUser(actor): MaybeUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CredentialsForm>,
) -> PageResult {
    if actor.is_some() {
        return Ok(Redirect::to("/vms").into_response());
    }

    let errors = match handlers::create_account(
        &state.repo,
        &form.email,
        &form.password,
        Some(form.full_name.as_str()),
        false,
    )
    .await
    {
        Ok(user) => {
            let token = auth::issue_token(&state.config, user.id)?;
            let cookie = auth::session_cookie(&state.config, &token);
            return Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to("/vms")).into_response());
        }
        Err(ApiError::Validation(errors)) => errors,
        Err(ApiError::Conflict(_)) => vec!["a user with this email already exists".to_string()],
        Err(e) => return Err(e.into()),
    };

    let body = views::auth_form("/register", true, &form.email, &form.full_name, &errors);
    Ok(render(&headers, StatusCode::OK, None, "Register", &body))
}

pub async fn login_form(MaybeUser(actor): MaybeUser, headers: HeaderMap) -> Response {
    if actor.is_some() {
        return Redirect::to("/vms").into_response();
    }
    let body = views::auth_form("/login", false, "", "", &[]);
    render(&headers, StatusCode::OK, None, "Log in", &body)
}

/// login
///
/// Verifies the credentials; blocked accounts are refused here and only here.
pub async fn login(
    MaybeUser(actor): MaybeUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CredentialsForm>,
) -> PageResult {
    if actor.is_some() {
        return Ok(Redirect::to("/vms").into_response());
    }

    let email = normalize_email(&form.email);
    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .filter(|user| password::verify_password(form.password.trim(), &user.password_hash));

    let error = match user {
        None => "invalid email or password".to_string(),
        Some(user) => match gate::admit(&user) {
            Ok(()) => {
                tracing::info!(user_id = user.id, "user logged in");
                let token = auth::issue_token(&state.config, user.id)?;
                let cookie = auth::session_cookie(&state.config, &token);
                return Ok((AppendHeaders([(SET_COOKIE, cookie)]), Redirect::to("/vms")).into_response());
            }
            Err(denied) => {
                tracing::warn!(user_id = user.id, "blocked user attempted to log in");
                denied.to_string()
            }
        },
    };

    let body = views::auth_form("/login", false, &form.email, "", &[error]);
    Ok(render(&headers, StatusCode::OK, None, "Log in", &body))
}

pub async fn logout() -> Response {
    (
        AppendHeaders([(SET_COOKIE, auth::clear_session_cookie())]),
        Redirect::to("/login"),
    )
        .into_response()
}

// --- Authenticated Pages ---

pub async fn profile_form(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PageResult {
    let user = state.repo.get_user(actor.id).await?.ok_or(ApiError::NotFound)?;
    let body = views::profile_form(&user, &[]);
    Ok(render(&headers, StatusCode::OK, Some(&actor), "Profile", &body))
}

pub async fn profile(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ProfileUpdateRequest>,
) -> PageResult {
    let errors = match handlers::apply_profile_update(&state.repo, &actor, form).await {
        Ok(_) => return Ok(redirect_with_flash("/profile", "Profile updated")),
        Err(ApiError::Validation(errors)) => errors,
        Err(ApiError::Conflict(message)) => vec![message],
        Err(e) => return Err(e.into()),
    };

    let user = state.repo.get_user(actor.id).await?.ok_or(ApiError::NotFound)?;
    let body = views::profile_form(&user, &errors);
    Ok(render(&headers, StatusCode::OK, Some(&actor), "Profile", &body))
}

/// vms
///
/// The caller's VMs; deleted ones only with `?include_deleted=1`.
pub async fn vms(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    Query(query): Query<VmListQuery>,
    headers: HeaderMap,
) -> PageResult {
    let scope = VmScope::Owned {
        include_deleted: handlers::flag(query.include_deleted.as_deref()),
    };
    let vms = handlers::fetch_vms(&state.repo, &actor, scope).await?;
    Ok(render(&headers, StatusCode::OK, Some(&actor), "My VMs", &views::vm_list(&vms)))
}

pub async fn vm_create_form(SessionUser(actor): SessionUser, headers: HeaderMap) -> Response {
    let body = views::vm_form("/vms/create", "", "", "", &[]);
    render(&headers, StatusCode::OK, Some(&actor), "New VM", &body)
}

pub async fn vm_create(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<VmForm>,
) -> PageResult {
    match form.spec() {
        Ok(spec) => {
            let vm = state.repo.create_vm(actor.id, spec).await?;
            tracing::info!(vm_id = vm.id, actor_id = actor.id, "vm created");
            Ok(redirect_with_flash("/vms", "VM created"))
        }
        Err(errors) => {
            let body = views::vm_form("/vms/create", &form.name, &form.ram_gb, &form.cpu, &errors);
            Ok(render(&headers, StatusCode::OK, Some(&actor), "New VM", &body))
        }
    }
}

/// vms_delete
///
/// Bulk soft-delete of the checked VMs. Ids the caller does not own, or that are
/// already deleted, are skipped; the rest change in one transaction.
pub async fn vms_delete(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    body: Bytes,
) -> PageResult {
    let parsed: Result<Vec<i64>, _> = form_vm_ids(&body)
        .iter()
        .map(|raw| raw.trim().parse::<i64>())
        .collect();
    let Ok(mut ids) = parsed else {
        return Ok(redirect_with_flash("/vms", "Invalid VM ids"));
    };
    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        return Ok(redirect_with_flash("/vms", "No VMs selected"));
    }

    let affected = state.repo.soft_delete_owned_vms(actor.id, &ids).await?;
    tracing::info!(actor_id = actor.id, requested = ids.len(), affected, "bulk soft-delete");
    if affected == 0 {
        return Ok(redirect_with_flash("/vms", "No VMs available for deletion"));
    }
    Ok(redirect_with_flash(
        "/vms",
        &format!("Marked as deleted: {affected} VM(s)"),
    ))
}

/// Authorizes an edit; a deleted VM sends the user back to the list with a message.
async fn editable_vm(
    state: &AppState,
    actor: &Actor,
    id: i64,
) -> Result<Result<ActiveVm, Response>, PageError> {
    match gate::authorize_vm_write(actor, state.repo.get_vm(id).await?, VmWrite::Update) {
        Ok(vm) => Ok(Ok(vm)),
        Err(Denied::Invalid(message)) => Ok(Err(redirect_with_flash("/vms", &message))),
        Err(denied) => Err(denied.into()),
    }
}

pub async fn vm_edit_form(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> PageResult {
    let vm = match editable_vm(&state, &actor, id).await? {
        Ok(vm) => vm,
        Err(redirect) => return Ok(redirect),
    };
    let current = vm.vm();
    let body = views::vm_form(
        &format!("/vms/{id}/edit"),
        &current.name,
        &current.ram_gb.to_string(),
        &current.cpu.to_string(),
        &[],
    );
    Ok(render(&headers, StatusCode::OK, Some(&actor), "Edit VM", &body))
}

pub async fn vm_edit(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Form(form): Form<VmForm>,
) -> PageResult {
    let vm = match editable_vm(&state, &actor, id).await? {
        Ok(vm) => vm,
        Err(redirect) => return Ok(redirect),
    };
    match form.spec() {
        Ok(spec) => {
            let updated = state.repo.update_vm(vm, spec).await?;
            tracing::info!(vm_id = updated.id, actor_id = actor.id, "vm updated");
            Ok(redirect_with_flash("/vms", "VM updated"))
        }
        Err(errors) => {
            let body = views::vm_form(&format!("/vms/{id}/edit"), &form.name, &form.ram_gb, &form.cpu, &errors);
            Ok(render(&headers, StatusCode::OK, Some(&actor), "Edit VM", &body))
        }
    }
}

// --- Admin Pages ---

pub async fn admin_users(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PageResult {
    gate::require_admin(&actor)?;
    let users = state.repo.list_users().await?;
    Ok(render(&headers, StatusCode::OK, Some(&actor), "Users", &views::admin_users(&users)))
}

/// admin_toggle_block
///
/// Flips the block flag of a regular user. Refusals come back as a flash message.
pub async fn admin_toggle_block(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> PageResult {
    let target = match gate::authorize_block(&actor, state.repo.get_user(id).await?) {
        Ok(target) => target,
        Err(Denied::Invalid(message)) => return Ok(redirect_with_flash("/admin/users", &message)),
        Err(denied) => return Err(denied.into()),
    };

    let user = state
        .repo
        .set_blocked(target.id, !target.is_blocked)
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(user_id = user.id, is_blocked = user.is_blocked, actor_id = actor.id, "block state changed");

    let verb = if user.is_blocked { "Blocked" } else { "Unblocked" };
    Ok(redirect_with_flash("/admin/users", &format!("{verb} user {}", user.email)))
}

pub async fn admin_vms(
    SessionUser(actor): SessionUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PageResult {
    gate::require_admin(&actor)?;
    let rows = state.repo.list_vms_with_owners().await?;
    Ok(render(&headers, StatusCode::OK, Some(&actor), "All VMs", &views::admin_vms(&rows)))
}

/// require_admin_page
///
/// Middleware for admin-only non-API surfaces (the API docs): anyone else is sent to `/login`.
pub async fn require_admin_page(SessionUser(actor): SessionUser, request: Request, next: Next) -> Response {
    if !actor.is_admin {
        return Redirect::to("/login").into_response();
    }
    next.run(request).await
}
