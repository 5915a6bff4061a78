use crate::{
    error::RepoError,
    models::{ActiveVm, NewUser, ProfileChange, User, Vm, VmRow, VmSpec, VmWithOwners},
};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::{collections::HashSet, sync::Arc};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The persistence contract the handlers and the session extractor depend on.
/// Every mutating method is atomic: it either applies completely or not at all.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: i64) -> RepoResult<Option<User>>;
    /// `email` must already be normalized.
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    /// Fails with `RepoError::Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    /// All users, ascending id.
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    /// Case-insensitive substring match on email or full name, ascending id.
    async fn search_users(&self, query: &str) -> RepoResult<Vec<User>>;
    async fn set_blocked(&self, id: i64, is_blocked: bool) -> RepoResult<Option<User>>;
    /// `change.password` must already be hashed. Fails with `Conflict` on a taken email.
    async fn update_profile(&self, id: i64, change: ProfileChange) -> RepoResult<Option<User>>;
    /// Creates or promotes the provisioning admin account. Returns `true` when created.
    async fn ensure_admin(&self, email: &str, password_hash: &str) -> RepoResult<(User, bool)>;

    // --- VMs ---
    /// The ownership index of a user.
    async fn owned_vm_ids(&self, user_id: i64) -> RepoResult<HashSet<i64>>;
    async fn get_vm(&self, id: i64) -> RepoResult<Option<Vm>>;
    /// A user's VMs, ascending id.
    async fn list_owned_vms(&self, user_id: i64, include_deleted: bool) -> RepoResult<Vec<Vm>>;
    /// Every VM regardless of owner or state, ascending id.
    async fn list_all_vms(&self) -> RepoResult<Vec<Vm>>;
    async fn list_vms_with_owners(&self) -> RepoResult<Vec<VmWithOwners>>;
    /// Inserts the VM and attaches it to `owner_id` in the same transaction.
    async fn create_vm(&self, owner_id: i64, spec: VmSpec) -> RepoResult<Vm>;
    /// Fails with `RepoError::VmDeleted` when the VM was soft-deleted in the meantime.
    async fn update_vm(&self, vm: ActiveVm, spec: VmSpec) -> RepoResult<Vm>;
    async fn soft_delete_vm(&self, vm: ActiveVm) -> RepoResult<Vm>;
    /// Marks deleted those of `ids` that `user_id` owns and that are still active.
    /// Returns the number of VMs actually changed.
    async fn soft_delete_owned_vms(&self, user_id: i64, ids: &[i64]) -> RepoResult<u64>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str = "id, email, full_name, password_hash, is_admin, is_blocked";
const VM_COLUMNS: &str = "id, name, ram_gb, cpu, is_deleted";

/// Escapes `LIKE` wildcards so the query matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(FromRow)]
struct VmOwnersRow {
    #[sqlx(flatten)]
    vm: VmRow,
    owners: Vec<String>,
}

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Schema: `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: i64) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (email, full_name, password_hash, is_admin, is_blocked) \
             VALUES ($1, $2, $3, $4, false) RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC");
        Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
    }

    /// search_users
    ///
    /// `ILIKE` over email and full name with the query's own wildcards escaped.
    async fn search_users(&self, query: &str) -> RepoResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE email ILIKE $1 OR full_name ILIKE $1 \
             ORDER BY id ASC"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(like_pattern(query))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn set_blocked(&self, id: i64, is_blocked: bool) -> RepoResult<Option<User>> {
        let sql = format!("UPDATE users SET is_blocked = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(is_blocked)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// update_profile
    ///
    /// `COALESCE` keeps every column whose change is `None`.
    async fn update_profile(&self, id: i64, change: ProfileChange) -> RepoResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                full_name = COALESCE($3, full_name), \
                password_hash = COALESCE($4, password_hash) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(change.email)
            .bind(change.full_name)
            .bind(change.password)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn ensure_admin(&self, email: &str, password_hash: &str) -> RepoResult<(User, bool)> {
        let mut tx = self.pool.begin().await?;
        let promote = format!(
            "UPDATE users SET is_admin = true, is_blocked = false, password_hash = $2 \
             WHERE email = $1 RETURNING {USER_COLUMNS}"
        );
        let existing = sqlx::query_as::<_, User>(&promote)
            .bind(email)
            .bind(password_hash)
            .fetch_optional(&mut *tx)
            .await?;

        let result = match existing {
            Some(user) => (user, false),
            None => {
                let insert = format!(
                    "INSERT INTO users (email, full_name, password_hash, is_admin, is_blocked) \
                     VALUES ($1, 'Administrator', $2, true, false) RETURNING {USER_COLUMNS}"
                );
                let user = sqlx::query_as::<_, User>(&insert)
                    .bind(email)
                    .bind(password_hash)
                    .fetch_one(&mut *tx)
                    .await?;
                (user, true)
            }
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn owned_vm_ids(&self, user_id: i64) -> RepoResult<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT vm_id FROM user_vm WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn get_vm(&self, id: i64) -> RepoResult<Option<Vm>> {
        let sql = format!("SELECT {VM_COLUMNS} FROM vm WHERE id = $1");
        let row = sqlx::query_as::<_, VmRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Vm::from))
    }

    async fn list_owned_vms(&self, user_id: i64, include_deleted: bool) -> RepoResult<Vec<Vm>> {
        let rows = sqlx::query_as::<_, VmRow>(
            r#"
            SELECT v.id, v.name, v.ram_gb, v.cpu, v.is_deleted
            FROM vm v
            JOIN user_vm uv ON uv.vm_id = v.id
            WHERE uv.user_id = $1 AND ($2 OR NOT v.is_deleted)
            ORDER BY v.id ASC
            "#,
        )
        .bind(user_id)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Vm::from).collect())
    }

    async fn list_all_vms(&self) -> RepoResult<Vec<Vm>> {
        let sql = format!("SELECT {VM_COLUMNS} FROM vm ORDER BY id ASC");
        let rows = sqlx::query_as::<_, VmRow>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Vm::from).collect())
    }

    /// list_vms_with_owners
    ///
    /// One query: owners are aggregated into a text array per VM.
    async fn list_vms_with_owners(&self) -> RepoResult<Vec<VmWithOwners>> {
        let rows = sqlx::query_as::<_, VmOwnersRow>(
            r#"
            SELECT v.id, v.name, v.ram_gb, v.cpu, v.is_deleted,
                   COALESCE(
                       array_agg(u.email::TEXT ORDER BY u.email) FILTER (WHERE u.id IS NOT NULL),
                       '{}'::TEXT[]
                   ) AS owners
            FROM vm v
            LEFT JOIN user_vm uv ON uv.vm_id = v.id
            LEFT JOIN users u ON u.id = uv.user_id
            GROUP BY v.id
            ORDER BY v.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| VmWithOwners {
                vm: row.vm.into(),
                owners: row.owners,
            })
            .collect())
    }

    async fn create_vm(&self, owner_id: i64, spec: VmSpec) -> RepoResult<Vm> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO vm (name, ram_gb, cpu, is_deleted) VALUES ($1, $2, $3, false) \
             RETURNING {VM_COLUMNS}"
        );
        let row = sqlx::query_as::<_, VmRow>(&sql)
            .bind(spec.name())
            .bind(spec.ram_gb())
            .bind(spec.cpu())
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO user_vm (user_id, vm_id) VALUES ($1, $2)")
            .bind(owner_id)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_vm(&self, vm: ActiveVm, spec: VmSpec) -> RepoResult<Vm> {
        // The state guard makes a concurrent soft-delete win over a stale edit.
        let sql = format!(
            "UPDATE vm SET name = $2, ram_gb = $3, cpu = $4 \
             WHERE id = $1 AND NOT is_deleted RETURNING {VM_COLUMNS}"
        );
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, VmRow>(&sql)
            .bind(vm.id())
            .bind(spec.name())
            .bind(spec.ram_gb())
            .bind(spec.cpu())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::VmDeleted)?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn soft_delete_vm(&self, vm: ActiveVm) -> RepoResult<Vm> {
        let sql = format!("UPDATE vm SET is_deleted = true WHERE id = $1 RETURNING {VM_COLUMNS}");
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, VmRow>(&sql)
            .bind(vm.id())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    /// soft_delete_owned_vms
    ///
    /// A single `UPDATE` inside one transaction, so either every qualifying VM is
    /// marked or none is.
    async fn soft_delete_owned_vms(&self, user_id: i64, ids: &[i64]) -> RepoResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE vm SET is_deleted = true
            WHERE id = ANY($1)
              AND NOT is_deleted
              AND id IN (SELECT vm_id FROM user_vm WHERE user_id = $2)
            "#,
        )
        .bind(ids)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
