use serde_json::json;
use vm_manager::models::{
    BlockRequest, ProfileUpdateRequest, User, UserView, Vm, VmState, VmView,
};

#[test]
fn test_vm_view_exposes_deleted_flag() {
    let vm = Vm {
        id: 7,
        name: "web".to_string(),
        ram_gb: 8,
        cpu: 2,
        state: VmState::Deleted,
    };

    let value = serde_json::to_value(VmView::from(&vm)).unwrap();
    assert_eq!(
        value,
        json!({"id": 7, "name": "web", "ram_gb": 8, "cpu": 2, "is_deleted": true})
    );
}

#[test]
fn test_user_view_never_carries_password_hash() {
    let user = User {
        id: 1,
        email: "jane@example.com".to_string(),
        password_hash: "$argon2id$secret".to_string(),
        ..Default::default()
    };

    let value = serde_json::to_value(UserView::from(&user)).unwrap();
    assert!(value.get("password_hash").is_none());
    assert_eq!(value["email"], "jane@example.com");
    assert_eq!(value["is_blocked"], false);
}

#[test]
fn test_into_active_only_for_active_vms() {
    let active = Vm {
        id: 1,
        ..Default::default()
    };
    assert_eq!(active.into_active().unwrap().id(), 1);

    let deleted = Vm {
        id: 2,
        state: VmState::from(true),
        ..Default::default()
    };
    assert_eq!(deleted.into_active().unwrap_err().id, 2);
}

#[test]
fn test_optional_request_fields_default_to_none() {
    let block: BlockRequest = serde_json::from_value(json!({})).unwrap();
    assert!(block.is_blocked.is_none());

    let profile: ProfileUpdateRequest = serde_json::from_value(json!({"full_name": "Jane"})).unwrap();
    assert_eq!(profile.full_name.as_deref(), Some("Jane"));
    assert!(profile.email.is_none());
    assert!(profile.new_password.is_none());
}
