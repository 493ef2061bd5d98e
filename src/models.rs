use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::repository::{AuditFields, Entity};
use crate::store::{FieldMap, Id};

// --- Core Application Schemas (Mapped to Database) ---

/// UserType
///
/// Which surface a user belongs to. Stored as lowercase text in `users.type`
/// and in the `user_type` session claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum UserType {
    Panel,
    #[default]
    Dashboard,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            UserType::Panel => "panel",
            UserType::Dashboard => "dashboard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "panel" => Some(UserType::Panel),
            "dashboard" => Some(UserType::Dashboard),
            _ => None,
        }
    }

    /// Landing page after login and for the root redirect.
    pub fn home_path(self) -> &'static str {
        match self {
            UserType::Panel => "/panel/home",
            UserType::Dashboard => "/dashboard/home",
        }
    }
}

/// User
///
/// The canonical account record stored in the `users` table. `password` holds
/// an Argon2 PHC string and never leaves the server; responses use
/// [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    // Login identifier, unique among live rows.
    pub account: String,
    pub password: String,
    // `true` means the account may log in.
    pub status: bool,
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

/// Sortable columns of the `users` listing.
pub const USER_SORT_COLUMNS: [&str; 6] = ["id", "name", "account", "status", "created_at", "updated_at"];

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Credentials posted to `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    #[schema(example = "admin")]
    pub account: String,
    pub password: String,
}

/// UpdatePasswordRequest
///
/// Input payload for `PUT /auth/password`. `confirm_password` must equal
/// `new_password`; that check happens before the auth service is called.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// CreateUserRequest
///
/// Input payload for `POST /panel/users`. The plain password is hashed before
/// the row is written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserRequest {
    pub name: String,
    pub account: String,
    pub password: String,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(rename = "type")]
    pub user_type: UserType,
}

fn default_status() -> bool {
    true
}

/// UpdateUserRequest
///
/// Partial update for `PUT /panel/users/{id}`. Only provided fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
}

impl UpdateUserRequest {
    /// The field map handed to `Repository::update`. Empty when nothing was provided.
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), Value::from(name.clone()));
        }
        if let Some(account) = &self.account {
            fields.insert("account".to_string(), Value::from(account.clone()));
        }
        if let Some(status) = self.status {
            fields.insert("status".to_string(), Value::from(status));
        }
        if let Some(user_type) = self.user_type {
            fields.insert("type".to_string(), Value::from(user_type.as_str()));
        }
        fields
    }
}

/// UserCondition
///
/// Selects the rows a bulk operation applies to. At least one field must be set.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
}

impl UserCondition {
    pub fn to_fields(&self) -> FieldMap {
        let mut condition = FieldMap::new();
        if let Some(status) = self.status {
            condition.insert("status".to_string(), Value::from(status));
        }
        if let Some(user_type) = self.user_type {
            condition.insert("type".to_string(), Value::from(user_type.as_str()));
        }
        condition
    }

    /// Whether a row with this `status` and `type` would be selected.
    pub fn matches(&self, status: bool, user_type: UserType) -> bool {
        self.status.is_none_or(|s| s == status) && self.user_type.is_none_or(|t| t == user_type)
    }
}

/// BulkStatusRequest
///
/// Input payload for `PUT /panel/users/status`: sets `status` on every user
/// matching `condition`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BulkStatusRequest {
    pub condition: UserCondition,
    pub status: bool,
}

// --- Response Schemas (Output) ---

/// UserProfile
///
/// Public view of a [`User`]: everything except the password hash and the
/// deletion marker.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    pub id: Id,
    pub name: String,
    pub account: String,
    pub status: bool,
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Id>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            account: user.account.clone(),
            status: user.status,
            user_type: user.user_type,
            created_at: user.audit.created_at,
            updated_at: user.audit.updated_at,
            updated_by: user.audit.updated_by,
        }
    }
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self::from(&user)
    }
}

/// AuthResponse
///
/// Result of login, logout and password change: a message for the user and
/// the page the client should go to next.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AuthResponse {
    pub message: String,
    pub redirect: String,
}

/// HomeResponse
///
/// Landing payload of `/panel/home` and `/dashboard/home`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct HomeResponse {
    pub surface: UserType,
    pub user_id: Id,
    pub user_name: String,
}

/// BulkResult
///
/// How many rows a bulk operation touched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BulkResult {
    pub affected: u64,
}

/// Paginated
///
/// Envelope for list endpoints. `total` counts every match, not just this page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}
