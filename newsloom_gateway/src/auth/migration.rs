use std::sync::Mutex;

use chrono::{DateTime, Utc};
use newsloom_core::AppError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Phase of the legacy-to-gateway cut-over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
  LegacyOnly,
  Hybrid,
  GatewayOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
  pub mode: MigrationMode,
  pub mode_changed_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub migrated_at: Option<DateTime<Utc>>,
}

/// Operator-driven migration state machine:
/// `LegacyOnly -> Hybrid -> GatewayOnly`, forward-only with one recovery
/// edge: Hybrid may revert to LegacyOnly to back out of a bad rollout.
/// Once GatewayOnly, every mode change is rejected.
pub struct MigrationController {
  status: Mutex<MigrationStatus>,
}

impl MigrationController {
  pub fn new(initial: MigrationMode) -> Self {
    Self {
      status: Mutex::new(MigrationStatus {
        mode: initial,
        mode_changed_at: Utc::now(),
        migrated_at: None,
      }),
    }
  }

  pub fn from_mode_str(mode: &str) -> Result<Self, AppError> {
    let mode = match mode {
      "legacy_only" => MigrationMode::LegacyOnly,
      "hybrid" => MigrationMode::Hybrid,
      "gateway_only" => MigrationMode::GatewayOnly,
      other => {
        return Err(AppError::config(format!("unknown migration mode {other:?}")));
      }
    };
    Ok(Self::new(mode))
  }

  pub fn mode(&self) -> MigrationMode {
    self.status.lock().expect("migration mutex poisoned").mode
  }

  pub fn status(&self) -> MigrationStatus {
    self
      .status
      .lock()
      .expect("migration mutex poisoned")
      .clone()
  }

  /// Enable or disable hybrid mode. Disabling from LegacyOnly is a no-op;
  /// disabling from Hybrid reverts the rollout; any change after
  /// completion is a conflict.
  pub fn set_migration_mode(&self, enabled: bool) -> Result<MigrationStatus, AppError> {
    let mut status = self.status.lock().expect("migration mutex poisoned");
    match (status.mode, enabled) {
      (MigrationMode::GatewayOnly, _) => Err(
        AppError::conflict("migration already completed; mode can no longer change")
          .with_component("migration"),
      ),
      (MigrationMode::LegacyOnly, false) | (MigrationMode::Hybrid, true) => Ok(status.clone()),
      (MigrationMode::LegacyOnly, true) => {
        status.mode = MigrationMode::Hybrid;
        status.mode_changed_at = Utc::now();
        info!("csrf migration mode enabled: legacy_only -> hybrid");
        Ok(status.clone())
      }
      (MigrationMode::Hybrid, false) => {
        status.mode = MigrationMode::LegacyOnly;
        status.mode_changed_at = Utc::now();
        info!("csrf migration mode reverted: hybrid -> legacy_only");
        Ok(status.clone())
      }
    }
  }

  /// Finish the migration. Allowed only from Hybrid; repeating it is a
  /// no-op that keeps the original completion timestamp.
  pub fn complete_migration(&self) -> Result<MigrationStatus, AppError> {
    let mut status = self.status.lock().expect("migration mutex poisoned");
    match status.mode {
      MigrationMode::Hybrid => {
        let now = Utc::now();
        status.mode = MigrationMode::GatewayOnly;
        status.mode_changed_at = now;
        status.migrated_at = Some(now);
        info!("csrf migration completed: hybrid -> gateway_only");
        Ok(status.clone())
      }
      MigrationMode::GatewayOnly => Ok(status.clone()),
      MigrationMode::LegacyOnly => Err(
        AppError::conflict("cannot complete migration before entering hybrid mode")
          .with_component("migration"),
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use newsloom_core::ErrorKind;

  #[test]
  fn forward_path_and_timestamps() {
    let controller = MigrationController::new(MigrationMode::LegacyOnly);

    let status = controller.set_migration_mode(true).unwrap();
    assert_eq!(status.mode, MigrationMode::Hybrid);
    assert!(status.migrated_at.is_none());

    let status = controller.complete_migration().unwrap();
    assert_eq!(status.mode, MigrationMode::GatewayOnly);
    let completed_at = status.migrated_at.unwrap();

    // Repeat completion keeps the original timestamp.
    let status = controller.complete_migration().unwrap();
    assert_eq!(status.migrated_at.unwrap(), completed_at);
  }

  #[test]
  fn disabling_from_legacy_only_is_a_no_op() {
    let controller = MigrationController::new(MigrationMode::LegacyOnly);
    let status = controller.set_migration_mode(false).unwrap();
    assert_eq!(status.mode, MigrationMode::LegacyOnly);
  }

  #[test]
  fn hybrid_reverts_to_legacy_only() {
    let controller = MigrationController::new(MigrationMode::Hybrid);
    let status = controller.set_migration_mode(false).unwrap();
    assert_eq!(status.mode, MigrationMode::LegacyOnly);
  }

  #[test]
  fn gateway_only_rejects_mode_changes() {
    let controller = MigrationController::new(MigrationMode::Hybrid);
    controller.complete_migration().unwrap();

    for enabled in [true, false] {
      let err = controller.set_migration_mode(enabled).unwrap_err();
      assert!(err.is_kind(ErrorKind::Conflict));
    }
  }

  #[test]
  fn completing_from_legacy_only_is_rejected() {
    let controller = MigrationController::new(MigrationMode::LegacyOnly);
    let err = controller.complete_migration().unwrap_err();
    assert!(err.is_kind(ErrorKind::Conflict));
  }

  #[test]
  fn unknown_initial_mode_is_config_error() {
    assert!(MigrationController::from_mode_str("dual").is_err());
    assert_eq!(
      MigrationController::from_mode_str("hybrid").unwrap().mode(),
      MigrationMode::Hybrid
    );
  }
}
