//! Keyed holding areas shared between producers and worker rounds.
//!
//! Every accessor returns an owned copy, so a round can iterate its snapshot
//! while producers keep adding to the live map.

use crate::types::{DatabaseRequest, FleetMember, ObjectRequest};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub trait PoolKey {
    fn pool_key(&self) -> String;
}

impl PoolKey for ObjectRequest {
    fn pool_key(&self) -> String {
        self.path.clone()
    }
}

impl PoolKey for DatabaseRequest {
    fn pool_key(&self) -> String {
        self.path.clone()
    }
}

impl PoolKey for FleetMember {
    fn pool_key(&self) -> String {
        self.address.clone()
    }
}

/// Mutex-guarded last-write-wins map.
pub struct KeyedPool<T> {
    entries: Mutex<HashMap<String, T>>,
}

pub type ObjectRequestPool = KeyedPool<ObjectRequest>;
pub type DatabaseRequestPool = KeyedPool<DatabaseRequest>;
pub type MembershipPool = KeyedPool<FleetMember>;

impl<T: PoolKey + Clone> KeyedPool<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts `entry`, replacing any pending entry with the same key.
    pub fn add(&self, entry: T) {
        let key = entry.pool_key();
        self.lock().insert(key, entry);
    }

    pub fn add_all(&self, entries: impl IntoIterator<Item = T>) {
        let mut map = self.lock();
        for entry in entries {
            map.insert(entry.pool_key(), entry);
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.lock().get(key).cloned()
    }

    /// Full copy of the current contents.
    pub fn snapshot(&self) -> HashMap<String, T> {
        self.lock().clone()
    }

    pub fn list(&self) -> Vec<T> {
        self.lock().values().cloned().collect()
    }

    /// Removes `key`; missing keys are ignored.
    pub fn remove(&self, key: &str) -> Option<T> {
        self.lock().remove(key)
    }

    pub fn remove_all<S: AsRef<str>>(&self, keys: &[S]) {
        let mut map = self.lock();
        for key in keys {
            map.remove(key.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: PoolKey + Clone> Default for KeyedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipPool {
    pub fn find_by_name(&self, name: &str) -> Option<FleetMember> {
        self.lock().values().find(|member| member.name == name).cloned()
    }
}
