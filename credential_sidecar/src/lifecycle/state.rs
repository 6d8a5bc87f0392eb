use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a credential record.
///
/// `Uninitialized -> Loaded <-> Refreshing`; transient failures return to
/// `Loaded` on the next successful refresh. `FailedPermanent` is terminal:
/// the process keeps serving `INVALID_CREDENTIALS` until an operator
/// reseeds the credential and forces a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
  Uninitialized,
  Loaded,
  Refreshing,
  FailedTransient,
  FailedPermanent,
}

impl CredentialState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, CredentialState::FailedPermanent)
  }
}

impl fmt::Display for CredentialState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      CredentialState::Uninitialized => "uninitialized",
      CredentialState::Loaded => "loaded",
      CredentialState::Refreshing => "refreshing",
      CredentialState::FailedTransient => "failed_transient",
      CredentialState::FailedPermanent => "failed_permanent",
    };
    f.write_str(s)
  }
}
