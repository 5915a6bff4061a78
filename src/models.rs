use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::ops::RangeInclusive;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Core Records (Mapped to Database) ---

/// User
///
/// An account row from the `users` table. The email is always stored lowercase.
/// Never serialized directly: `password_hash` must not leave the server, see [`UserView`].
#[derive(Debug, Clone, FromRow, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    // argon2 PHC string.
    pub password_hash: String,
    pub is_admin: bool,
    pub is_blocked: bool,
}

/// Lifecycle of a managed VM. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmState {
    #[default]
    Active,
    Deleted,
}

impl VmState {
    pub fn is_deleted(self) -> bool {
        self == VmState::Deleted
    }
}

impl From<bool> for VmState {
    fn from(is_deleted: bool) -> Self {
        if is_deleted { VmState::Deleted } else { VmState::Active }
    }
}

/// Vm
///
/// A virtual machine metadata record. Soft-deleted records stay in the store
/// with `state = Deleted` and are excluded from default listings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vm {
    pub id: i64,
    pub name: String,
    pub ram_gb: i32,
    pub cpu: i32,
    pub state: VmState,
}

impl Vm {
    /// Succeeds only while the VM is still active.
    pub fn into_active(self) -> Result<ActiveVm, Vm> {
        match self.state {
            VmState::Active => Ok(ActiveVm(self)),
            VmState::Deleted => Err(self),
        }
    }
}

/// Raw row shape of the `vm` table.
#[derive(Debug, FromRow)]
pub(crate) struct VmRow {
    pub id: i64,
    pub name: String,
    pub ram_gb: i32,
    pub cpu: i32,
    pub is_deleted: bool,
}

impl From<VmRow> for Vm {
    fn from(row: VmRow) -> Self {
        Vm {
            id: row.id,
            name: row.name,
            ram_gb: row.ram_gb,
            cpu: row.cpu,
            state: row.is_deleted.into(),
        }
    }
}

/// ActiveVm
///
/// Proof that a VM was active when it was authorized. The repository only
/// accepts this type for mutations, so a deleted VM cannot be edited or deleted again.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVm(Vm);

impl ActiveVm {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn vm(&self) -> &Vm {
        &self.0
    }
}

/// A VM together with the emails of every owner, for the admin overview.
#[derive(Debug, Clone, PartialEq)]
pub struct VmWithOwners {
    pub vm: Vm,
    pub owners: Vec<String>,
}

// --- Validated Input ---

pub const RAM_GB_RANGE: RangeInclusive<i64> = 0..=32;
pub const CPU_RANGE: RangeInclusive<i64> = 1..=16;
pub const VM_NAME_MAX_LEN: usize = 255;

/// VmSpec
///
/// The mutable fields of a VM, after validation. Only obtainable through [`VmSpec::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct VmSpec {
    name: String,
    ram_gb: i32,
    cpu: i32,
}

impl VmSpec {
    /// parse
    ///
    /// `ram_gb`/`cpu` are `None` when the client sent something that is not an integer.
    /// Every violated rule is reported, not just the first.
    pub fn parse(name: &str, ram_gb: Option<i64>, cpu: Option<i64>) -> Result<VmSpec, Vec<String>> {
        let mut errors = Vec::new();
        let name = name.trim();

        if name.is_empty() {
            errors.push("name is required".to_string());
        } else if name.chars().count() > VM_NAME_MAX_LEN {
            errors.push(format!("name must be at most {VM_NAME_MAX_LEN} characters"));
        }

        match ram_gb {
            None => errors.push("ram_gb must be an integer".to_string()),
            Some(v) if !RAM_GB_RANGE.contains(&v) => errors.push(format!(
                "ram_gb must be between {} and {}",
                RAM_GB_RANGE.start(),
                RAM_GB_RANGE.end()
            )),
            Some(_) => {}
        }

        match cpu {
            None => errors.push("cpu must be an integer".to_string()),
            Some(v) if !CPU_RANGE.contains(&v) => errors.push(format!(
                "cpu must be between {} and {}",
                CPU_RANGE.start(),
                CPU_RANGE.end()
            )),
            Some(_) => {}
        }

        match (ram_gb, cpu) {
            (Some(ram_gb), Some(cpu)) if errors.is_empty() => Ok(VmSpec {
                name: name.to_string(),
                // Both values are range-checked above, so they fit in i32.
                ram_gb: ram_gb as i32,
                cpu: cpu as i32,
            }),
            _ => Err(errors),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ram_gb(&self) -> i32 {
        self.ram_gb
    }

    pub fn cpu(&self) -> i32 {
        self.cpu
    }
}

/// NewUser
///
/// Input to `Repository::create_user`. The email must already be normalized
/// and the password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub is_admin: bool,
}

/// ProfileChange
///
/// The subset of profile fields a caller is allowed to change, as decided by the gate.
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChange {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
}

impl ProfileChange {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.full_name.is_none() && self.password.is_none()
    }
}

// --- Response Payloads (Output Schemas) ---

/// VmView
///
/// JSON representation of a VM (`GET /vms`, `GET /vms/{id}`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct VmView {
    pub id: i64,
    pub name: String,
    pub ram_gb: i32,
    pub cpu: i32,
    pub is_deleted: bool,
}

impl From<&Vm> for VmView {
    fn from(vm: &Vm) -> Self {
        VmView {
            id: vm.id,
            name: vm.name.clone(),
            ram_gb: vm.ram_gb,
            cpu: vm.cpu,
            is_deleted: vm.state.is_deleted(),
        }
    }
}

/// UserView
///
/// JSON representation of an account, without the credential.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub is_blocked: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        UserView {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_admin: user.is_admin,
            is_blocked: user.is_blocked,
        }
    }
}

/// List envelope for VMs: `{"items": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VmList {
    pub items: Vec<VmView>,
}

/// List envelope for users: `{"items": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserList {
    pub items: Vec<UserView>,
}

// --- Request Payloads (Input Schemas) ---

/// CreateVmRequest
///
/// Body of `POST /vms`. The handler reads it leniently (numeric strings are accepted
/// for `ram_gb`/`cpu`) and reports every bad field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateVmRequest {
    #[schema(example = "vm-new")]
    pub name: String,
    #[schema(example = 4, minimum = 0, maximum = 32)]
    pub ram_gb: i32,
    #[schema(example = 2, minimum = 1, maximum = 16)]
    pub cpu: i32,
    /// Admin only: attach the VM to this user instead of the caller.
    pub owner_id: Option<i64>,
}

/// UpdateVmRequest
///
/// Partial update for `PATCH /vms/{id}`; omitted fields keep their current values.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateVmRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
}

/// CreateUserRequest
///
/// Body of the admin-only `POST /users`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "user@example.com")]
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// BlockRequest
///
/// Body of `PATCH /users/{id}/block`. An absent flag toggles the current state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct BlockRequest {
    #[serde(default)]
    pub is_blocked: Option<bool>,
}

/// ProfileUpdateRequest
///
/// Body of `PATCH /me` and the `/profile` form.
/// For administrators only the password fields are honored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ProfileUpdateRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
    #[serde(default)]
    pub new_password2: Option<String>,
}
