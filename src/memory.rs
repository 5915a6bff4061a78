use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::RwLock;

use crate::{
    error::RepoError,
    models::{ActiveVm, NewUser, ProfileChange, User, Vm, VmSpec, VmState, VmWithOwners},
    repository::{RepoResult, Repository},
};

#[derive(Default)]
struct Store {
    users: BTreeMap<i64, User>,
    vms: BTreeMap<i64, Vm>,
    // (user_id, vm_id)
    links: BTreeSet<(i64, i64)>,
    next_user_id: i64,
    next_vm_id: i64,
}

impl Store {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn owners_of(&self, vm_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.links
            .iter()
            .filter(move |(_, vid)| *vid == vm_id)
            .map(|(uid, _)| *uid)
    }

    fn insert_user(&mut self, user: NewUser) -> User {
        self.next_user_id += 1;
        let user = User {
            id: self.next_user_id,
            email: user.email,
            full_name: user.full_name,
            password_hash: user.password_hash,
            is_admin: user.is_admin,
            is_blocked: false,
        };
        self.users.insert(user.id, user.clone());
        user
    }
}

/// InMemoryRepository
///
/// A complete `Repository` kept in process memory. Each operation runs under a
/// single write (or read) lock, which gives the same all-or-nothing behavior as a
/// database transaction. Used by the test-suite.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: i64) -> RepoResult<Option<User>> {
        Ok(self.store.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut store = self.store.write().await;
        if store.email_taken(&user.email, None) {
            return Err(RepoError::Conflict);
        }
        Ok(store.insert_user(user))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        Ok(self.store.read().await.users.values().cloned().collect())
    }

    async fn search_users(&self, query: &str) -> RepoResult<Vec<User>> {
        let needle = query.to_lowercase();
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .filter(|u| {
                u.email.to_lowercase().contains(&needle)
                    || u
                        .full_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn set_blocked(&self, id: i64, is_blocked: bool) -> RepoResult<Option<User>> {
        let mut store = self.store.write().await;
        Ok(store.users.get_mut(&id).map(|user| {
            user.is_blocked = is_blocked;
            user.clone()
        }))
    }

    async fn update_profile(&self, id: i64, change: ProfileChange) -> RepoResult<Option<User>> {
        let mut store = self.store.write().await;
        if let Some(email) = &change.email {
            if store.email_taken(email, Some(id)) {
                return Err(RepoError::Conflict);
            }
        }
        Ok(store.users.get_mut(&id).map(|user| {
            if let Some(email) = change.email {
                user.email = email;
            }
            if let Some(full_name) = change.full_name {
                user.full_name = Some(full_name);
            }
            if let Some(password_hash) = change.password {
                user.password_hash = password_hash;
            }
            user.clone()
        }))
    }

    async fn ensure_admin(&self, email: &str, password_hash: &str) -> RepoResult<(User, bool)> {
        let mut store = self.store.write().await;
        if let Some(user) = store.users.values_mut().find(|u| u.email == email) {
            user.is_admin = true;
            user.is_blocked = false;
            user.password_hash = password_hash.to_string();
            return Ok((user.clone(), false));
        }
        let user = store.insert_user(NewUser {
            email: email.to_string(),
            full_name: Some("Administrator".to_string()),
            password_hash: password_hash.to_string(),
            is_admin: true,
        });
        Ok((user, true))
    }

    async fn owned_vm_ids(&self, user_id: i64) -> RepoResult<HashSet<i64>> {
        let store = self.store.read().await;
        Ok(store
            .links
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, vm_id)| *vm_id)
            .collect())
    }

    async fn get_vm(&self, id: i64) -> RepoResult<Option<Vm>> {
        Ok(self.store.read().await.vms.get(&id).cloned())
    }

    async fn list_owned_vms(&self, user_id: i64, include_deleted: bool) -> RepoResult<Vec<Vm>> {
        let store = self.store.read().await;
        Ok(store
            .links
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .filter_map(|(_, vm_id)| store.vms.get(vm_id))
            .filter(|vm| include_deleted || !vm.state.is_deleted())
            .cloned()
            .collect())
    }

    async fn list_all_vms(&self) -> RepoResult<Vec<Vm>> {
        Ok(self.store.read().await.vms.values().cloned().collect())
    }

    async fn list_vms_with_owners(&self) -> RepoResult<Vec<VmWithOwners>> {
        let store = self.store.read().await;
        Ok(store
            .vms
            .values()
            .map(|vm| {
                let mut owners: Vec<String> = store
                    .owners_of(vm.id)
                    .filter_map(|uid| store.users.get(&uid))
                    .map(|u| u.email.clone())
                    .collect();
                owners.sort();
                VmWithOwners {
                    vm: vm.clone(),
                    owners,
                }
            })
            .collect())
    }

    async fn create_vm(&self, owner_id: i64, spec: VmSpec) -> RepoResult<Vm> {
        let mut store = self.store.write().await;
        if !store.users.contains_key(&owner_id) {
            return Err(RepoError::Database(sqlx::Error::RowNotFound));
        }
        store.next_vm_id += 1;
        let vm = Vm {
            id: store.next_vm_id,
            name: spec.name().to_string(),
            ram_gb: spec.ram_gb(),
            cpu: spec.cpu(),
            state: VmState::Active,
        };
        store.vms.insert(vm.id, vm.clone());
        store.links.insert((owner_id, vm.id));
        Ok(vm)
    }

    async fn update_vm(&self, vm: ActiveVm, spec: VmSpec) -> RepoResult<Vm> {
        let mut store = self.store.write().await;
        match store.vms.get_mut(&vm.id()) {
            Some(stored) if !stored.state.is_deleted() => {
                stored.name = spec.name().to_string();
                stored.ram_gb = spec.ram_gb();
                stored.cpu = spec.cpu();
                Ok(stored.clone())
            }
            Some(_) => Err(RepoError::VmDeleted),
            None => Err(RepoError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn soft_delete_vm(&self, vm: ActiveVm) -> RepoResult<Vm> {
        let mut store = self.store.write().await;
        let stored = store
            .vms
            .get_mut(&vm.id())
            .ok_or(RepoError::Database(sqlx::Error::RowNotFound))?;
        stored.state = VmState::Deleted;
        Ok(stored.clone())
    }

    async fn soft_delete_owned_vms(&self, user_id: i64, ids: &[i64]) -> RepoResult<u64> {
        let mut store = self.store.write().await;
        let targets: BTreeSet<i64> = ids
            .iter()
            .copied()
            .filter(|id| store.links.contains(&(user_id, *id)))
            .collect();

        let mut affected = 0;
        for id in targets {
            if let Some(vm) = store.vms.get_mut(&id) {
                if !vm.state.is_deleted() {
                    vm.state = VmState::Deleted;
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }
}
