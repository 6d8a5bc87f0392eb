use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::auth::migration::MigrationStatus;
use crate::error::GatewayError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
  pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct MigrationResponse {
  pub status: &'static str,
  pub migration_mode: MigrationStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub migration_completed: Option<bool>,
}

impl MigrationResponse {
  fn from_status(status: MigrationStatus) -> Self {
    let completed = status.migrated_at.is_some();
    Self {
      status: "ok",
      migration_completed: completed.then_some(true),
      migration_mode: status,
    }
  }
}

/// `GET /admin/csrf/migration/status`
pub async fn migration_status(State(state): State<AppState>) -> Json<MigrationResponse> {
  Json(MigrationResponse::from_status(state.plane.migration().status()))
}

/// `PUT /admin/csrf/migration/mode`
pub async fn set_migration_mode(
  State(state): State<AppState>,
  Json(body): Json<SetModeRequest>,
) -> Result<Json<MigrationResponse>, GatewayError> {
  let status = state.plane.migration().set_migration_mode(body.enabled)?;
  Ok(Json(MigrationResponse::from_status(status)))
}

/// `POST /admin/csrf/migration/complete`
pub async fn complete_migration(
  State(state): State<AppState>,
) -> Result<Json<MigrationResponse>, GatewayError> {
  let status = state.plane.migration().complete_migration()?;
  Ok(Json(MigrationResponse::from_status(status)))
}
