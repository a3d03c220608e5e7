use std::collections::{HashMap, HashSet};

use super::ConnectionId;

/// Secrets under which a presenter is currently active.
///
/// Each entry also remembers which connections registered it. The default
/// disconnect handling ignores that and wipes everything, but the owners make
/// [`SecretRegistry::release`] possible for deployments hosting several
/// presentations on one relay.
#[derive(Debug, Default)]
pub struct SecretRegistry {
    active: HashMap<String, HashSet<ConnectionId>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `secret` as active on behalf of `owner`.
    ///
    /// Returns `true` if the secret was not active before.
    pub fn register(&mut self, secret: String, owner: ConnectionId) -> bool {
        let newly_active = !self.active.contains_key(&secret);
        self.active.entry(secret).or_default().insert(owner);
        newly_active
    }

    pub fn is_active(&self, secret: &str) -> bool {
        self.active.contains_key(secret)
    }

    /// Drop every entry, returning how many secrets were active.
    pub fn clear_all(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }

    /// Forget everything `owner` registered. A secret stays active while any
    /// other connection still holds it.
    ///
    /// Returns the secrets that are no longer active.
    pub fn release(&mut self, owner: &ConnectionId) -> Vec<String> {
        let mut released = Vec::new();
        self.active.retain(|secret, owners| {
            owners.remove(owner);
            if owners.is_empty() {
                released.push(secret.clone());
                false
            } else {
                true
            }
        });
        released
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
