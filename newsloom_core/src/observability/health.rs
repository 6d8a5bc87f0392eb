use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
  pub status: HealthStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
  pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
  pub fn healthy() -> Self {
    Self {
      status: HealthStatus::Healthy,
      detail: None,
      checked_at: Utc::now(),
    }
  }

  pub fn degraded(detail: impl Into<String>) -> Self {
    Self {
      status: HealthStatus::Degraded,
      detail: Some(detail.into()),
      checked_at: Utc::now(),
    }
  }

  pub fn unhealthy(detail: impl Into<String>) -> Self {
    Self {
      status: HealthStatus::Unhealthy,
      detail: Some(detail.into()),
      checked_at: Utc::now(),
    }
  }
}

/// Aggregated health of a service: the worst component status wins.
///
/// A failing *dependency* is reported by its owner as `Degraded`, not
/// `Unhealthy`: an unreachable auth service degrades the gateway instead
/// of taking it out of rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
  pub status: HealthStatus,
  pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthSnapshot {
  pub fn new() -> Self {
    Self {
      status: HealthStatus::Healthy,
      components: BTreeMap::new(),
    }
  }

  pub fn with_component(mut self, name: impl Into<String>, health: ComponentHealth) -> Self {
    self.status = self.status.max(health.status);
    self.components.insert(name.into(), health);
    self
  }

  pub fn is_serving(&self) -> bool {
    self.status != HealthStatus::Unhealthy
  }
}

impl Default for HealthSnapshot {
  fn default() -> Self {
    Self::new()
  }
}
