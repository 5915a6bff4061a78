//! Authorization decisions.
//!
//! Every function here is pure: the caller resolves the [`Actor`] and the target
//! record first, then asks the gate whether the operation may proceed.

use std::collections::HashSet;

use crate::{
    error::ApiError,
    models::{ActiveVm, ProfileChange, ProfileUpdateRequest, User, Vm},
    validators::{self, collect_errors},
};

/// Actor
///
/// The authenticated identity performing a request, with its ownership index
/// (ids of every VM attached to it) loaded up front.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    owned: HashSet<i64>,
}

impl Actor {
    pub fn new(user: &User, owned: HashSet<i64>) -> Self {
        Actor {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_admin: user.is_admin,
            owned,
        }
    }

    pub fn owns(&self, vm_id: i64) -> bool {
        self.owned.contains(&vm_id)
    }

    pub fn owned_ids(&self) -> &HashSet<i64> {
        &self.owned
    }
}

/// Why the gate refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        match denied {
            Denied::Forbidden => ApiError::Forbidden,
            Denied::NotFound => ApiError::NotFound,
            Denied::Invalid(message) => ApiError::Validation(vec![message]),
        }
    }
}

/// Mutations that require an active VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmWrite {
    Update,
    Delete,
}

/// Which VMs a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmScope {
    /// Every VM in the system, deleted ones included.
    Everything,
    /// The actor's own VMs.
    Owned { include_deleted: bool },
}

/// Login check: a blocked account may not start a session.
pub fn admit(user: &User) -> Result<(), Denied> {
    if user.is_blocked {
        return Err(Denied::Invalid(
            "your account is blocked; contact an administrator".to_string(),
        ));
    }
    Ok(())
}

pub fn require_admin(actor: &Actor) -> Result<(), Denied> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(Denied::Forbidden)
    }
}

fn check_vm_access(actor: &Actor, vm: Option<Vm>) -> Result<Vm, Denied> {
    // Existence first: an unresolved id is NotFound for everybody.
    let vm = vm.ok_or(Denied::NotFound)?;
    if actor.is_admin || actor.owns(vm.id) {
        Ok(vm)
    } else {
        Err(Denied::Forbidden)
    }
}

/// Read access to a single VM. Deleted VMs stay readable by their owners and admins.
pub fn authorize_vm_read(actor: &Actor, vm: Option<Vm>) -> Result<Vm, Denied> {
    check_vm_access(actor, vm)
}

/// Update or soft-delete access to a single VM.
pub fn authorize_vm_write(actor: &Actor, vm: Option<Vm>, write: VmWrite) -> Result<ActiveVm, Denied> {
    check_vm_access(actor, vm)?.into_active().map_err(|_| {
        Denied::Invalid(match write {
            VmWrite::Update => "cannot edit a deleted VM".to_string(),
            VmWrite::Delete => "VM is already deleted".to_string(),
        })
    })
}

/// vm_scope
///
/// Resolves listing flags. For an admin with `all` the `include_deleted` flag is
/// ignored and deleted VMs are always returned.
pub fn vm_scope(actor: &Actor, all: bool, include_deleted: bool) -> Result<VmScope, Denied> {
    if all {
        require_admin(actor)?;
        return Ok(VmScope::Everything);
    }
    Ok(VmScope::Owned { include_deleted })
}

/// Decides who a new VM is attached to. Only admins may name another owner.
pub fn vm_owner(actor: &Actor, requested: Option<i64>) -> Result<i64, Denied> {
    match requested {
        None => Ok(actor.id),
        Some(id) if id == actor.id => Ok(id),
        Some(id) => {
            require_admin(actor)?;
            Ok(id)
        }
    }
}

/// Block/unblock. Administrators can never be blocked, whoever asks.
pub fn authorize_block(actor: &Actor, target: Option<User>) -> Result<User, Denied> {
    require_admin(actor)?;
    let target = target.ok_or(Denied::NotFound)?;
    if target.is_admin {
        return Err(Denied::Invalid("administrators cannot be blocked".to_string()));
    }
    Ok(target)
}

/// Admin user search; returns the trimmed query.
pub fn search_query(actor: &Actor, query: Option<&str>) -> Result<String, Denied> {
    require_admin(actor)?;
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => Ok(q.to_string()),
        _ => Err(Denied::Invalid("search query must not be empty".to_string())),
    }
}

/// Trimmed value, `None` when blank. Passwords are validated and stored in this form.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// plan_profile_update
///
/// Self-service profile changes. Regular users may change email and full name;
/// for administrators those fields are dropped without error and only the
/// password can change. Email uniqueness is checked by the caller against the store.
pub fn plan_profile_update(
    actor: &Actor,
    request: ProfileUpdateRequest,
) -> Result<ProfileChange, Vec<String>> {
    let mut change = ProfileChange::default();
    let mut errors = Vec::new();

    if !actor.is_admin {
        if let Some(email) = request.email {
            match validators::validate_email(&email) {
                Ok(()) => change.email = Some(validators::normalize_email(&email)),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if let Some(full_name) = request.full_name {
            match validators::validate_full_name(&full_name) {
                Ok(()) => change.full_name = Some(full_name.trim().to_string()),
                Err(e) => errors.push(e.to_string()),
            }
        }
    }

    match (non_blank(request.new_password), non_blank(request.new_password2)) {
        (None, None) => {}
        (Some(password), Some(confirmation)) if password == confirmation => {
            match validators::validate_password(&password) {
                Ok(()) => change.password = Some(password),
                Err(e) => errors.push(e.to_string()),
            }
        }
        _ => errors.push("passwords do not match".to_string()),
    }

    if errors.is_empty() { Ok(change) } else { Err(errors) }
}

/// Registration and admin-created accounts share the same field rules.
pub fn check_new_account(email: &str, password: &str, full_name: Option<&str>) -> Vec<String> {
    collect_errors([
        full_name.map_or(Ok(()), validators::validate_full_name),
        validators::validate_email(email),
        validators::validate_password(password),
    ])
}
