use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  User,
  Readonly,
}

impl Role {
  pub fn can_mutate(&self) -> bool {
    matches!(self, Role::Admin | Role::User)
  }
}

impl FromStr for Role {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "admin" => Ok(Role::Admin),
      "user" => Ok(Role::User),
      "readonly" => Ok(Role::Readonly),
      other => Err(AppError::validation(format!("unknown role: {other}"))),
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Role::Admin => f.write_str("admin"),
      Role::User => f.write_str("user"),
      Role::Readonly => f.write_str("readonly"),
    }
  }
}

/// Authenticated identity carried through a request's lifetime.
///
/// Built once at the auth boundary and never mutated afterwards; handlers
/// receive it by shared reference or clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
  pub user_id: String,
  pub email: String,
  pub role: Role,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tenant_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

impl UserContext {
  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }
}
