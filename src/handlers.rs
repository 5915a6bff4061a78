use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, Result},
    gate::{self, Actor, VmScope, VmWrite},
    models::{
        BlockRequest, CreateUserRequest, CreateVmRequest, NewUser, ProfileUpdateRequest,
        UpdateVmRequest, User, UserList, UserView, Vm, VmList, VmSpec, VmView,
    },
    password,
    repository::RepositoryState,
    validators::{json_int, normalize_email},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};

// --- Query Structs ---

/// VmListQuery
///
/// Flags of `GET /vms`. `1`, `true` and `yes` (any case) mean true.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VmListQuery {
    /// Include soft-deleted VMs (ignored by the admin `all` listing, which always includes them).
    pub include_deleted: Option<String>,
    /// Admin only: list the VMs of every user.
    pub all: Option<String>,
}

/// SearchQuery
///
/// `GET /users/search?q=...`
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Case-insensitive substring of an email or full name.
    pub q: Option<String>,
}

pub fn flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Parses a JSON body, reporting malformed JSON as a validation failure.
/// An empty body is the type's default; for `Map` anything but an object is rejected.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid(format!("invalid JSON body: {e}")))
}

fn vm_items(vms: &[Vm]) -> VmList {
    VmList {
        items: vms.iter().map(VmView::from).collect(),
    }
}

fn user_items(users: &[User]) -> UserList {
    UserList {
        items: users.iter().map(UserView::from).collect(),
    }
}

// --- Shared Operations (also used by the HTML pages) ---

/// The VMs covered by a listing scope.
pub(crate) async fn fetch_vms(repo: &RepositoryState, actor: &Actor, scope: VmScope) -> Result<Vec<Vm>> {
    let vms = match scope {
        VmScope::Everything => repo.list_all_vms().await?,
        VmScope::Owned { include_deleted } => repo.list_owned_vms(actor.id, include_deleted).await?,
    };
    Ok(vms)
}

/// apply_profile_update
///
/// Runs the gate's profile rules, checks the new email against other accounts,
/// hashes the new password, and persists the change.
pub(crate) async fn apply_profile_update(
    repo: &RepositoryState,
    actor: &Actor,
    request: ProfileUpdateRequest,
) -> Result<User> {
    let mut change = gate::plan_profile_update(actor, request).map_err(ApiError::Validation)?;

    if let Some(email) = &change.email {
        if let Some(other) = repo.find_user_by_email(email).await? {
            if other.id != actor.id {
                return Err(ApiError::Conflict("email already in use by another user".to_string()));
            }
        }
    }
    if let Some(plain) = change.password.take() {
        change.password = Some(password::hash_password(&plain)?);
    }

    let user = repo
        .update_profile(actor.id, change)
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(user_id = user.id, "profile updated");
    Ok(user)
}

/// Validates and stores a new account. Shared by registration and admin creation.
pub(crate) async fn create_account(
    repo: &RepositoryState,
    email: &str,
    plain_password: &str,
    full_name: Option<&str>,
    is_admin: bool,
) -> Result<User> {
    let errors = gate::check_new_account(email, plain_password, full_name);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let user = repo
        .create_user(NewUser {
            email: normalize_email(email),
            full_name: full_name.map(|name| name.trim().to_string()),
            password_hash: password::hash_password(plain_password.trim())?,
            is_admin,
        })
        .await?;
    tracing::info!(user_id = user.id, is_admin, "user created");
    Ok(user)
}

// --- VM Handlers ---

/// list_vms
///
/// Lists the caller's VMs. With `all=true` an admin gets every VM in the system.
#[utoipa::path(
    get,
    path = "/api/v1/vms",
    params(VmListQuery),
    responses(
        (status = 200, description = "List of VMs", body = VmList),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "`all` requested by a non-admin")
    )
)]
pub async fn list_vms(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<VmListQuery>,
) -> Result<Json<VmList>> {
    let scope = gate::vm_scope(
        &actor,
        flag(query.all.as_deref()),
        flag(query.include_deleted.as_deref()),
    )?;
    let vms = fetch_vms(&state.repo, &actor, scope).await?;
    Ok(Json(vm_items(&vms)))
}

/// create_vm
///
/// Creates a VM owned by the caller, or by `owner_id` when the caller is an admin.
#[utoipa::path(
    post,
    path = "/api/v1/vms",
    request_body = CreateVmRequest,
    responses(
        (status = 201, description = "Created", body = VmView),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "`owner_id` set by a non-admin")
    )
)]
pub async fn create_vm(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<VmView>)> {
    let data: Map<String, Value> = parse_body(&body)?;

    let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
    let spec = VmSpec::parse(name, json_int(data.get("ram_gb")), json_int(data.get("cpu")))
        .map_err(ApiError::Validation)?;

    let requested_owner = match data.get("owner_id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            json_int(Some(raw)).ok_or_else(|| ApiError::invalid("owner_id must be an integer"))?,
        ),
    };
    let owner_id = gate::vm_owner(&actor, requested_owner)?;
    if owner_id != actor.id && state.repo.get_user(owner_id).await?.is_none() {
        return Err(ApiError::invalid("owner_id does not reference an existing user"));
    }

    let vm = state.repo.create_vm(owner_id, spec).await?;
    tracing::info!(vm_id = vm.id, owner_id, actor_id = actor.id, "vm created");
    Ok((StatusCode::CREATED, Json(VmView::from(&vm))))
}

/// get_vm
///
/// A single VM, if the caller owns it or is an admin. Soft-deleted VMs are still returned.
#[utoipa::path(
    get,
    path = "/api/v1/vms/{id}",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 200, description = "VM found", body = VmView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "VM belongs to someone else"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_vm(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<VmView>> {
    let vm = gate::authorize_vm_read(&actor, state.repo.get_vm(id).await?)?;
    Ok(Json(VmView::from(&vm)))
}

/// update_vm
///
/// Partial update; omitted fields keep their values. Deleted VMs are immutable.
#[utoipa::path(
    patch,
    path = "/api/v1/vms/{id}",
    params(("id" = i64, Path, description = "VM id")),
    request_body = UpdateVmRequest,
    responses(
        (status = 200, description = "Updated", body = VmView),
        (status = 400, description = "Validation error or VM deleted"),
        (status = 403, description = "VM belongs to someone else"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_vm(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<VmView>> {
    let vm = gate::authorize_vm_write(&actor, state.repo.get_vm(id).await?, VmWrite::Update)?;
    let data: Map<String, Value> = parse_body(&body)?;

    let current = vm.vm();
    let name = match data.get("name") {
        None | Some(Value::Null) => current.name.as_str(),
        Some(raw) => raw.as_str().unwrap_or_default(),
    };
    let ram_gb = match data.get("ram_gb") {
        None | Some(Value::Null) => Some(i64::from(current.ram_gb)),
        raw => json_int(raw),
    };
    let cpu = match data.get("cpu") {
        None | Some(Value::Null) => Some(i64::from(current.cpu)),
        raw => json_int(raw),
    };
    let spec = VmSpec::parse(name, ram_gb, cpu).map_err(ApiError::Validation)?;

    let updated = state.repo.update_vm(vm, spec).await?;
    tracing::info!(vm_id = updated.id, actor_id = actor.id, "vm updated");
    Ok(Json(VmView::from(&updated)))
}

/// delete_vm
///
/// Soft-deletes a VM. The record stays retrievable by id.
#[utoipa::path(
    delete,
    path = "/api/v1/vms/{id}",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Already deleted"),
        (status = 403, description = "VM belongs to someone else"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_vm(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let vm = gate::authorize_vm_write(&actor, state.repo.get_vm(id).await?, VmWrite::Delete)?;
    let deleted = state.repo.soft_delete_vm(vm).await?;
    tracing::info!(vm_id = deleted.id, actor_id = actor.id, "vm soft-deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- User Handlers (admin) ---

/// list_users
///
/// [Admin] Every account, ascending id.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "All users", body = UserList),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(AuthUser(actor): AuthUser, State(state): State<AppState>) -> Result<Json<UserList>> {
    gate::require_admin(&actor)?;
    let users = state.repo.list_users().await?;
    Ok(Json(user_items(&users)))
}

/// create_user
///
/// [Admin] Creates an account with the same field rules as registration.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserView),
        (status = 400, description = "Validation error"),
        (status = 403, description = "Not an admin"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_user(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UserView>)> {
    gate::require_admin(&actor)?;
    let request: CreateUserRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid(format!("invalid JSON body: {e}")))?;

    let user = create_account(
        &state.repo,
        &request.email,
        &request.password,
        request.full_name.as_deref(),
        request.is_admin,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// search_users
///
/// [Admin] Case-insensitive substring search on email or full name, ascending id.
#[utoipa::path(
    get,
    path = "/api/v1/users/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching users", body = UserList),
        (status = 400, description = "Empty query"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn search_users(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<UserList>> {
    let q = gate::search_query(&actor, query.q.as_deref())?;
    let users = state.repo.search_users(&q).await?;
    Ok(Json(user_items(&users)))
}

/// get_user
///
/// [Admin] A single account.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Found", body = UserView),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_user(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserView>> {
    gate::require_admin(&actor)?;
    let user = state.repo.get_user(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(UserView::from(&user)))
}

/// set_user_blocked
///
/// [Admin] Blocks or unblocks an account; without `is_blocked` the state is toggled.
/// Administrators cannot be blocked.
#[utoipa::path(
    patch,
    path = "/api/v1/users/{id}/block",
    params(("id" = i64, Path, description = "User id")),
    request_body = BlockRequest,
    responses(
        (status = 200, description = "Updated", body = UserView),
        (status = 400, description = "Target is an administrator"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found")
    )
)]
pub async fn set_user_blocked(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<UserView>> {
    let target = gate::authorize_block(&actor, state.repo.get_user(id).await?)?;
    let request: BlockRequest = parse_body(&body)?;

    let is_blocked = request.is_blocked.unwrap_or(!target.is_blocked);
    let user = state
        .repo
        .set_blocked(target.id, is_blocked)
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(user_id = user.id, is_blocked, actor_id = actor.id, "block state changed");
    Ok(Json(UserView::from(&user)))
}

// --- Self-service ---

/// get_me
///
/// The caller's own account.
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Profile", body = UserView),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_me(AuthUser(actor): AuthUser, State(state): State<AppState>) -> Result<Json<UserView>> {
    let user = state.repo.get_user(actor.id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(UserView::from(&user)))
}

/// update_me
///
/// Regular users may change email, full name and password; administrators only
/// their password (email and full name are ignored for them).
#[utoipa::path(
    patch,
    path = "/api/v1/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Updated", body = UserView),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn update_me(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UserView>> {
    let request: ProfileUpdateRequest = parse_body(&body)?;
    let user = apply_profile_update(&state.repo, &actor, request).await?;
    Ok(Json(UserView::from(&user)))
}
