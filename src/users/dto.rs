use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::users::repo_types::User;

pub const MIN_FULL_NAME_LEN: usize = 4;
pub const DEFAULT_LIMIT: i64 = 10;

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NewUser {
    #[validate(email(message = "value is not a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(min = 4, message = "must be at least 4 characters"))]
    pub full_name: Option<String>,
}

/// Public projection of a user. Never carries the password hash or timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            full_name: u.full_name,
            is_active: u.is_active,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "must be between 1 and 100"))]
    pub limit: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "must be greater than or equal to 0"))]
    pub offset: i64,
}
fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Partial update of a user. Only fields set to `Some` are written.
///
/// `full_name: Some(None)` clears the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate)]
pub struct UserChanges {
    #[validate(email(message = "value is not a valid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 4, message = "must be at least 4 characters"))]
    pub full_name: Option<Option<String>>,
    pub is_active: Option<bool>,
    #[validate(custom(function = "validate_phc_hash"))]
    pub hashed_password: Option<String>,
}

fn validate_phc_hash(hash: &str) -> Result<(), ValidationError> {
    if hash.starts_with('$') {
        return Ok(());
    }
    let mut error = ValidationError::new("phc_hash");
    error.message = Some("must be a PHC hash string".into());
    Err(error)
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.full_name.is_none()
            && self.is_active.is_none()
            && self.hashed_password.is_none()
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn full_name(mut self, full_name: Option<String>) -> Self {
        self.full_name = Some(full_name);
        self
    }

    pub fn is_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn hashed_password(mut self, hash: impl Into<String>) -> Self {
        self.hashed_password = Some(hash.into());
        self
    }
}
