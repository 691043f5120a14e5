use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identity of the caller on whose behalf background work runs.
///
/// Captured when work is launched and moved into the task that performs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
  pub principal: String,
  #[serde(default)]
  pub roles: BTreeSet<String>,
}

impl AuthContext {
  pub fn new(principal: impl Into<String>) -> Self {
    Self {
      principal: principal.into(),
      roles: BTreeSet::new(),
    }
  }

  /// Context used by the scheduler for work it performs on its own behalf.
  pub fn system() -> Self {
    Self::new("system").with_role("ROLE_ADMIN")
  }

  pub fn with_role(mut self, role: impl Into<String>) -> Self {
    self.roles.insert(role.into());
    self
  }

  pub fn has_role(&self, role: &str) -> bool {
    self.roles.contains(role)
  }
}
