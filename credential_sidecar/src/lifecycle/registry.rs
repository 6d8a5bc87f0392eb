use std::sync::Arc;

use dashmap::DashMap;

use super::manager::{CredentialStatus, TokenLifecycleManager};

/// Read-mostly map of credential name to its lifecycle manager. Populated
/// once at startup; lookups are lock-free on the hot path.
#[derive(Default)]
pub struct CredentialRegistry {
  managers: DashMap<String, Arc<TokenLifecycleManager>>,
}

impl CredentialRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, manager: Arc<TokenLifecycleManager>) {
    self.managers.insert(manager.name().to_string(), manager);
  }

  pub fn get(&self, name: &str) -> Option<Arc<TokenLifecycleManager>> {
    self.managers.get(name).map(|entry| entry.value().clone())
  }

  pub fn managers(&self) -> Vec<Arc<TokenLifecycleManager>> {
    self
      .managers
      .iter()
      .map(|entry| entry.value().clone())
      .collect()
  }

  pub async fn statuses(&self) -> Vec<CredentialStatus> {
    let mut statuses = Vec::new();
    for manager in self.managers() {
      statuses.push(manager.current_status().await);
    }
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    statuses
  }
}
