/// Permission table: maps chat user ids to the roles they hold.
///
/// The table is the stock `RoleResolver`: it is seeded from the `permissions`
/// config section and can be edited at runtime (e.g. by an admin command).
/// Clones share the same underlying table.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use opbot_core::RoleResolver;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    inner: Arc<RwLock<BTreeMap<String, BTreeSet<String>>>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `user -> roles` pairs.
    pub fn from_map<I, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, R)>,
        R: IntoIterator<Item = String>,
    {
        let map = entries
            .into_iter()
            .map(|(user, roles)| (user, roles.into_iter().collect()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Give `role` to `user`. Returns `false` if the user already held it.
    pub fn add_permission(&self, user: &str, role: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let added = map
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        if added {
            info!(user, role, "Granted role");
        }
        added
    }

    /// Take `role` away from `user`. Returns `false` if the user did not hold it.
    pub fn remove_permission(&self, user: &str, role: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(roles) = map.get_mut(user) else {
            return false;
        };
        let removed = roles.remove(role);
        if roles.is_empty() {
            map.remove(user);
        }
        if removed {
            info!(user, role, "Revoked role");
        }
        removed
    }

    /// Roles held by `user`, sorted.
    pub fn permissions(&self, user: &str) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(user)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoleResolver for PermissionTable {
    async fn resolve(&self, user: &str) -> Result<Vec<String>> {
        let map = self
            .inner
            .read()
            .map_err(|_| anyhow!("permission table poisoned"))?;
        Ok(map
            .get(user)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }
}
