use std::collections::HashSet;
use vm_manager::{
    gate::{self, Actor, Denied, VmScope, VmWrite},
    models::{ProfileUpdateRequest, User, Vm, VmState},
};

// --- Fixtures ---

fn user(id: i64, is_admin: bool) -> User {
    User {
        id,
        email: format!("user{id}@example.com"),
        full_name: Some("Test User".to_string()),
        is_admin,
        ..Default::default()
    }
}

fn actor(id: i64, is_admin: bool, owned: &[i64]) -> Actor {
    Actor::new(&user(id, is_admin), owned.iter().copied().collect::<HashSet<_>>())
}

fn vm(id: i64, state: VmState) -> Vm {
    Vm {
        id,
        name: format!("vm-{id}"),
        ram_gb: 4,
        cpu: 2,
        state,
    }
}

fn password_change(new_password: &str, new_password2: &str) -> ProfileUpdateRequest {
    ProfileUpdateRequest {
        new_password: Some(new_password.to_string()),
        new_password2: Some(new_password2.to_string()),
        ..Default::default()
    }
}

// --- Login ---

#[test]
fn test_blocked_user_is_not_admitted() {
    let mut blocked = user(1, false);
    blocked.is_blocked = true;

    assert!(gate::admit(&user(1, false)).is_ok());
    assert_eq!(
        gate::admit(&blocked),
        Err(Denied::Invalid("your account is blocked; contact an administrator".to_string()))
    );
}

// --- VM Access ---

#[test]
fn test_owner_reads_own_vm_including_deleted() {
    let owner = actor(1, false, &[10]);
    assert_eq!(gate::authorize_vm_read(&owner, Some(vm(10, VmState::Active))).unwrap().id, 10);
    assert!(gate::authorize_vm_read(&owner, Some(vm(10, VmState::Deleted))).is_ok());
}

#[test]
fn test_stranger_is_forbidden_and_missing_is_not_found() {
    let stranger = actor(2, false, &[]);
    assert_eq!(
        gate::authorize_vm_read(&stranger, Some(vm(10, VmState::Active))),
        Err(Denied::Forbidden)
    );
    assert_eq!(gate::authorize_vm_read(&stranger, None), Err(Denied::NotFound));
}

#[test]
fn test_admin_reads_and_writes_any_vm() {
    let admin = actor(99, true, &[]);
    assert!(gate::authorize_vm_read(&admin, Some(vm(10, VmState::Active))).is_ok());
    let active = gate::authorize_vm_write(&admin, Some(vm(10, VmState::Active)), VmWrite::Update)
        .expect("admins may edit any active VM");
    assert_eq!(active.id(), 10);
}

#[test]
fn test_deleted_vm_cannot_be_written() {
    let owner = actor(1, false, &[10]);
    assert_eq!(
        gate::authorize_vm_write(&owner, Some(vm(10, VmState::Deleted)), VmWrite::Update),
        Err(Denied::Invalid("cannot edit a deleted VM".to_string()))
    );
    assert_eq!(
        gate::authorize_vm_write(&owner, Some(vm(10, VmState::Deleted)), VmWrite::Delete),
        Err(Denied::Invalid("VM is already deleted".to_string()))
    );
}

#[test]
fn test_write_checks_ownership_before_state() {
    let stranger = actor(2, false, &[]);
    assert_eq!(
        gate::authorize_vm_write(&stranger, Some(vm(10, VmState::Deleted)), VmWrite::Delete),
        Err(Denied::Forbidden)
    );
}

// --- Listing and Creation ---

#[test]
fn test_vm_scope_all_requires_admin() {
    let regular = actor(1, false, &[]);
    let admin = actor(99, true, &[]);

    assert_eq!(gate::vm_scope(&regular, true, false), Err(Denied::Forbidden));
    assert_eq!(
        gate::vm_scope(&regular, false, true),
        Ok(VmScope::Owned { include_deleted: true })
    );
    // `include_deleted` has no effect on the admin-wide listing.
    assert_eq!(gate::vm_scope(&admin, true, false), Ok(VmScope::Everything));
}

#[test]
fn test_vm_owner_defaults_to_caller() {
    let regular = actor(1, false, &[]);
    let admin = actor(99, true, &[]);

    assert_eq!(gate::vm_owner(&regular, None), Ok(1));
    assert_eq!(gate::vm_owner(&regular, Some(1)), Ok(1));
    assert_eq!(gate::vm_owner(&regular, Some(5)), Err(Denied::Forbidden));
    assert_eq!(gate::vm_owner(&admin, Some(5)), Ok(5));
}

// --- User Administration ---

#[test]
fn test_block_rules() {
    let admin = actor(99, true, &[]);
    let regular = actor(1, false, &[]);

    assert_eq!(gate::authorize_block(&regular, Some(user(2, false))), Err(Denied::Forbidden));
    assert_eq!(gate::authorize_block(&admin, None), Err(Denied::NotFound));
    assert_eq!(
        gate::authorize_block(&admin, Some(user(98, true))),
        Err(Denied::Invalid("administrators cannot be blocked".to_string()))
    );
    assert_eq!(gate::authorize_block(&admin, Some(user(2, false))).unwrap().id, 2);
}

#[test]
fn test_search_query_is_trimmed_and_required() {
    let admin = actor(99, true, &[]);
    assert_eq!(gate::search_query(&admin, Some("  jane ")), Ok("jane".to_string()));
    assert!(matches!(gate::search_query(&admin, Some("   ")), Err(Denied::Invalid(_))));
    assert!(matches!(gate::search_query(&admin, None), Err(Denied::Invalid(_))));
    assert_eq!(gate::search_query(&actor(1, false, &[]), Some("jane")), Err(Denied::Forbidden));
}

// --- Profile ---

#[test]
fn test_regular_user_profile_change() {
    let regular = actor(1, false, &[]);
    let request = ProfileUpdateRequest {
        email: Some(" New@Example.com ".to_string()),
        full_name: Some(" New Name ".to_string()),
        ..Default::default()
    };

    let change = gate::plan_profile_update(&regular, request).unwrap();
    assert_eq!(change.email.as_deref(), Some("new@example.com"));
    assert_eq!(change.full_name.as_deref(), Some("New Name"));
    assert!(change.password.is_none());
}

#[test]
fn test_admin_identity_fields_are_ignored() {
    let admin = actor(99, true, &[]);
    let request = ProfileUpdateRequest {
        email: Some("not an email".to_string()),
        full_name: Some("New Name".to_string()),
        ..Default::default()
    };

    let change = gate::plan_profile_update(&admin, request).unwrap();
    assert!(change.is_empty());
}

#[test]
fn test_password_confirmation_must_match() {
    let regular = actor(1, false, &[]);

    let errors = gate::plan_profile_update(&regular, password_change("secret12", "secret13")).unwrap_err();
    assert_eq!(errors, vec!["passwords do not match".to_string()]);

    let change = gate::plan_profile_update(&regular, password_change("secret12", "secret12")).unwrap();
    assert_eq!(change.password.as_deref(), Some("secret12"));

    let errors = gate::plan_profile_update(&regular, password_change("abc", "abc")).unwrap_err();
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_new_password_is_trimmed() {
    let regular = actor(1, false, &[]);
    let change = gate::plan_profile_update(&regular, password_change(" secret12 ", "secret12")).unwrap();
    assert_eq!(change.password.as_deref(), Some("secret12"));
}

#[test]
fn test_blank_password_fields_mean_no_change() {
    let admin = actor(99, true, &[]);
    let change = gate::plan_profile_update(&admin, password_change("  ", "")).unwrap();
    assert!(change.password.is_none());
}

#[test]
fn test_new_account_collects_all_errors() {
    let errors = gate::check_new_account("bad", "x", Some("R2D2"));
    assert_eq!(errors.len(), 3);
    assert!(gate::check_new_account("jane@example.com", "secret1", Some("Jane Doe")).is_empty());
    assert!(gate::check_new_account("jane@example.com", "secret1", None).is_empty());
}
