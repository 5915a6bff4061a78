use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::json;
use std::sync::Arc;
use vm_manager::{
    AppConfig, AppState, InMemoryRepository,
    auth::AuthUser,
    error::ApiError,
    gate::Actor,
    handlers::{self, SearchQuery, VmListQuery},
    models::{NewUser, User, VmSpec},
    password::{hash_password, verify_password},
    repository::RepositoryState,
};

// --- Test Context ---

struct TestContext {
    state: AppState,
}

impl TestContext {
    fn new() -> Self {
        let repo = Arc::new(InMemoryRepository::new()) as RepositoryState;
        TestContext {
            state: AppState {
                repo,
                config: AppConfig::default(),
            },
        }
    }

    async fn user(&self, email: &str, is_admin: bool) -> User {
        self.state
            .repo
            .create_user(NewUser {
                email: email.to_string(),
                full_name: Some("Test User".to_string()),
                password_hash: hash_password("secret1").unwrap(),
                is_admin,
            })
            .await
            .unwrap()
    }

    /// The actor as the session extractor would resolve it right now.
    async fn auth(&self, user: &User) -> AuthUser {
        let owned = self.state.repo.owned_vm_ids(user.id).await.unwrap();
        AuthUser(Actor::new(user, owned))
    }

    async fn vm(&self, owner: &User, name: &str) -> i64 {
        let spec = VmSpec::parse(name, Some(4), Some(2)).unwrap();
        self.state.repo.create_vm(owner.id, spec).await.unwrap().id
    }

    fn state(&self) -> State<AppState> {
        State(self.state.clone())
    }
}

fn body(value: serde_json::Value) -> Bytes {
    Bytes::from(value.to_string())
}

fn list_query(all: Option<&str>, include_deleted: Option<&str>) -> Query<VmListQuery> {
    Query(VmListQuery {
        all: all.map(str::to_string),
        include_deleted: include_deleted.map(str::to_string),
    })
}

// --- VM Handlers ---

#[tokio::test]
async fn test_create_vm_for_self() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;

    let (status, vm) = handlers::create_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        body(json!({"name": " web ", "ram_gb": "8", "cpu": 4})),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(vm.name, "web");
    assert_eq!((vm.ram_gb, vm.cpu), (8, 4));
    assert!(!vm.is_deleted);
    assert!(ctx.state.repo.owned_vm_ids(jane.id).await.unwrap().contains(&vm.id));
}

#[tokio::test]
async fn test_create_vm_validation_errors() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;

    let result = handlers::create_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        body(json!({"name": "", "ram_gb": 33, "cpu": 0})),
    )
    .await;

    match result {
        Err(ApiError::Validation(errors)) => assert_eq!(errors.len(), 3),
        other => panic!("expected validation error, got {:?}", other.map(|(s, _)| s)),
    }
}

#[tokio::test]
async fn test_owner_id_is_admin_only() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;
    let jane = ctx.user("jane@example.com", false).await;
    let john = ctx.user("john@example.com", false).await;

    let denied = handlers::create_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        body(json!({"name": "x", "ram_gb": 1, "cpu": 1, "owner_id": john.id})),
    )
    .await;
    assert!(matches!(denied, Err(ApiError::Forbidden)));

    let (_, vm) = handlers::create_vm(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"name": "x", "ram_gb": 1, "cpu": 1, "owner_id": john.id})),
    )
    .await
    .unwrap();
    assert!(ctx.state.repo.owned_vm_ids(john.id).await.unwrap().contains(&vm.id));

    let missing = handlers::create_vm(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"name": "x", "ram_gb": 1, "cpu": 1, "owner_id": 9999})),
    )
    .await;
    assert!(matches!(missing, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn test_list_vms_scopes() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;
    let jane = ctx.user("jane@example.com", false).await;
    let john = ctx.user("john@example.com", false).await;
    ctx.vm(&jane, "jane-1").await;
    ctx.vm(&john, "john-1").await;

    let own = handlers::list_vms(ctx.auth(&jane).await, ctx.state(), list_query(None, None))
        .await
        .unwrap();
    assert_eq!(own.items.len(), 1);
    assert_eq!(own.items[0].name, "jane-1");

    let denied = handlers::list_vms(ctx.auth(&jane).await, ctx.state(), list_query(Some("true"), None)).await;
    assert!(matches!(denied, Err(ApiError::Forbidden)));

    let all = handlers::list_vms(ctx.auth(&admin).await, ctx.state(), list_query(Some("1"), None))
        .await
        .unwrap();
    assert_eq!(all.items.len(), 2);
}

#[tokio::test]
async fn test_get_vm_access() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    let john = ctx.user("john@example.com", false).await;
    let vm_id = ctx.vm(&jane, "web").await;

    let vm = handlers::get_vm(ctx.auth(&jane).await, ctx.state(), Path(vm_id)).await.unwrap();
    assert_eq!(vm.id, vm_id);

    let foreign = handlers::get_vm(ctx.auth(&john).await, ctx.state(), Path(vm_id)).await;
    assert!(matches!(foreign, Err(ApiError::Forbidden)));

    let missing = handlers::get_vm(ctx.auth(&jane).await, ctx.state(), Path(9999)).await;
    assert!(matches!(missing, Err(ApiError::NotFound)));
}

#[tokio::test]
async fn test_update_vm_is_partial() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    let vm_id = ctx.vm(&jane, "web").await;

    let updated = handlers::update_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        Path(vm_id),
        body(json!({"cpu": 8})),
    )
    .await
    .unwrap();
    assert_eq!(updated.name, "web");
    assert_eq!((updated.ram_gb, updated.cpu), (4, 8));

    let invalid = handlers::update_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        Path(vm_id),
        body(json!({"ram_gb": 64})),
    )
    .await;
    assert!(matches!(invalid, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn test_deleted_vm_is_readable_but_frozen() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    let vm_id = ctx.vm(&jane, "web").await;

    let status = handlers::delete_vm(ctx.auth(&jane).await, ctx.state(), Path(vm_id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let vm = handlers::get_vm(ctx.auth(&jane).await, ctx.state(), Path(vm_id)).await.unwrap();
    assert!(vm.is_deleted);

    let update = handlers::update_vm(
        ctx.auth(&jane).await,
        ctx.state(),
        Path(vm_id),
        body(json!({"name": "again"})),
    )
    .await;
    match update {
        Err(ApiError::Validation(errors)) => assert_eq!(errors, vec!["cannot edit a deleted VM"]),
        other => panic!("expected validation error, got {:?}", other.map(|v| v.id)),
    }

    let again = handlers::delete_vm(ctx.auth(&jane).await, ctx.state(), Path(vm_id)).await;
    assert!(matches!(again, Err(ApiError::Validation(_))));

    let listed = handlers::list_vms(ctx.auth(&jane).await, ctx.state(), list_query(None, Some("yes")))
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    let hidden = handlers::list_vms(ctx.auth(&jane).await, ctx.state(), list_query(None, None))
        .await
        .unwrap();
    assert!(hidden.items.is_empty());
}

#[tokio::test]
async fn test_update_vm_rejects_malformed_body() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    let vm_id = ctx.vm(&jane, "web").await;

    for raw in ["{\"ram_gb\": 64", "[1, 2]", "\"text\""] {
        let result = handlers::update_vm(
            ctx.auth(&jane).await,
            ctx.state(),
            Path(vm_id),
            Bytes::from(raw),
        )
        .await;
        assert!(
            matches!(result, Err(ApiError::Validation(_))),
            "body {raw:?} must be rejected"
        );
    }

    let stored = ctx.state.repo.get_vm(vm_id).await.unwrap().unwrap();
    assert_eq!((stored.name.as_str(), stored.ram_gb, stored.cpu), ("web", 4, 2));
}

#[tokio::test]
async fn test_create_vm_rejects_malformed_body() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;

    let result = handlers::create_vm(ctx.auth(&jane).await, ctx.state(), Bytes::from("{\"name\": ")).await;
    assert!(matches!(result, Err(ApiError::Validation(_))));
    assert!(ctx.state.repo.list_all_vms().await.unwrap().is_empty());
}

// --- User Handlers ---

#[tokio::test]
async fn test_user_endpoints_are_admin_only() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;

    assert!(matches!(
        handlers::list_users(ctx.auth(&jane).await, ctx.state()).await,
        Err(ApiError::Forbidden)
    ));
    assert!(matches!(
        handlers::get_user(ctx.auth(&jane).await, ctx.state(), Path(jane.id)).await,
        Err(ApiError::Forbidden)
    ));
    assert!(matches!(
        handlers::set_user_blocked(ctx.auth(&jane).await, ctx.state(), Path(jane.id), Bytes::new()).await,
        Err(ApiError::Forbidden)
    ));
}

#[tokio::test]
async fn test_block_by_non_admin_is_forbidden_before_body_checks() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    let john = ctx.user("john@example.com", false).await;

    let result = handlers::set_user_blocked(
        ctx.auth(&jane).await,
        ctx.state(),
        Path(john.id),
        Bytes::from("{not json"),
    )
    .await;
    assert!(matches!(result, Err(ApiError::Forbidden)));

    let stored = ctx.state.repo.get_user(john.id).await.unwrap().unwrap();
    assert!(!stored.is_blocked);
}

#[tokio::test]
async fn test_created_password_is_stored_trimmed() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;

    let (_, user) = handlers::create_user(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"email": "new@example.com", "password": "secret1 ", "full_name": "New User"})),
    )
    .await
    .unwrap();

    let stored = ctx.state.repo.get_user(user.id).await.unwrap().unwrap();
    assert!(verify_password("secret1", &stored.password_hash));
}

#[tokio::test]
async fn test_admin_creates_user_and_conflicts_on_duplicate() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;
    let request = json!({"email": "New@Example.com", "password": "secret1", "full_name": "New User"});

    let (status, user) = handlers::create_user(ctx.auth(&admin).await, ctx.state(), body(request.clone()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user.email, "new@example.com");
    assert!(!user.is_admin);

    let stored = ctx.state.repo.get_user(user.id).await.unwrap().unwrap();
    assert!(verify_password("secret1", &stored.password_hash));

    let duplicate = handlers::create_user(ctx.auth(&admin).await, ctx.state(), body(request)).await;
    assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
}

#[tokio::test]
async fn test_block_toggle_and_explicit() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;
    let other_admin = ctx.user("ops@example.com", true).await;
    let jane = ctx.user("jane@example.com", false).await;

    let toggled = handlers::set_user_blocked(ctx.auth(&admin).await, ctx.state(), Path(jane.id), Bytes::new())
        .await
        .unwrap();
    assert!(toggled.is_blocked);

    let explicit = handlers::set_user_blocked(
        ctx.auth(&admin).await,
        ctx.state(),
        Path(jane.id),
        body(json!({"is_blocked": true})),
    )
    .await
    .unwrap();
    assert!(explicit.is_blocked);

    let refused = handlers::set_user_blocked(
        ctx.auth(&admin).await,
        ctx.state(),
        Path(other_admin.id),
        body(json!({"is_blocked": true})),
    )
    .await;
    assert!(matches!(refused, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn test_search_users() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;
    ctx.user("jane@example.com", false).await;

    let found = handlers::search_users(
        ctx.auth(&admin).await,
        ctx.state(),
        Query(SearchQuery { q: Some("JANE".to_string()) }),
    )
    .await
    .unwrap();
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].email, "jane@example.com");

    let empty = handlers::search_users(ctx.auth(&admin).await, ctx.state(), Query(SearchQuery::default())).await;
    assert!(matches!(empty, Err(ApiError::Validation(_))));
}

// --- Self-service ---

#[tokio::test]
async fn test_update_me() {
    let ctx = TestContext::new();
    let jane = ctx.user("jane@example.com", false).await;
    ctx.user("john@example.com", false).await;

    let taken = handlers::update_me(ctx.auth(&jane).await, ctx.state(), body(json!({"email": "john@example.com"}))).await;
    assert!(matches!(taken, Err(ApiError::Conflict(_))));

    let updated = handlers::update_me(
        ctx.auth(&jane).await,
        ctx.state(),
        body(json!({"full_name": "Jane Roe", "new_password": "newpass1", "new_password2": "newpass1"})),
    )
    .await
    .unwrap();
    assert_eq!(updated.full_name.as_deref(), Some("Jane Roe"));

    let stored = ctx.state.repo.get_user(jane.id).await.unwrap().unwrap();
    assert!(verify_password("newpass1", &stored.password_hash));

    let me = handlers::get_me(ctx.auth(&jane).await, ctx.state()).await.unwrap();
    assert_eq!(me.full_name.as_deref(), Some("Jane Roe"));
}

#[tokio::test]
async fn test_admin_can_only_change_password() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;

    let updated = handlers::update_me(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"email": "other@example.com", "full_name": "Someone Else"})),
    )
    .await
    .unwrap();
    assert_eq!(updated.email, "root@example.com");
    assert_eq!(updated.full_name.as_deref(), Some("Test User"));
}

#[tokio::test]
async fn test_admin_changes_own_password() {
    let ctx = TestContext::new();
    let admin = ctx.user("root@example.com", true).await;

    let mismatch = handlers::update_me(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"new_password": "newpass1", "new_password2": "newpass2"})),
    )
    .await;
    match mismatch {
        Err(ApiError::Validation(errors)) => assert_eq!(errors, vec!["passwords do not match"]),
        other => panic!("expected validation error, got {:?}", other.map(|u| u.id)),
    }
    let stored = ctx.state.repo.get_user(admin.id).await.unwrap().unwrap();
    assert!(verify_password("secret1", &stored.password_hash));
    assert!(!verify_password("newpass1", &stored.password_hash));

    handlers::update_me(
        ctx.auth(&admin).await,
        ctx.state(),
        body(json!({"new_password": "newpass1", "new_password2": "newpass1"})),
    )
    .await
    .unwrap();
    let stored = ctx.state.repo.get_user(admin.id).await.unwrap().unwrap();
    assert!(verify_password("newpass1", &stored.password_hash));
    assert!(!verify_password("secret1", &stored.password_hash));
}
