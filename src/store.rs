// SPDX-License-Identifier: MIT
//! Persisted session state.
//!
//! The storage engine itself is a black box: anything shaped like a string
//! key-value store works. Two stores are paired with different lifetimes:
//! a **durable** store for the token, role and last-activity timestamp, and
//! an **ephemeral** store for the identity payload, which intentionally does
//! not survive a full restart without a valid, non-expired token.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Durable-store key holding the opaque session token.
pub const KEY_TOKEN: &str = "token";
/// Durable-store key holding the normalized role string.
pub const KEY_ROLE: &str = "role";
/// Durable-store key holding the last-activity timestamp (unix millis).
pub const KEY_LAST_ACTIVITY: &str = "last_activity";
/// Ephemeral-store key holding the identity payload (JSON).
pub const KEY_IDENTITY: &str = "identity";

/// Minimal string key-value store. Synchronous by design: session reads and
/// writes are simple read-modify-write steps with no suspension point, so
/// they cannot interleave with a concurrent reconnect or logout.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .write()
            .expect("store lock poisoned")
            .remove(key);
    }
}

/// The durable + ephemeral store pair with typed accessors for the fixed
/// session keys. `SessionManager` owns all writes; `RequestClient` only
/// calls [`SessionStore::clear_all`] on 401/403.
#[derive(Clone)]
pub struct SessionStore {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, ephemeral: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, ephemeral }
    }

    /// Fully in-memory pair, for embedding and tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn token(&self) -> Option<String> {
        self.durable.get(KEY_TOKEN)
    }

    pub fn set_token(&self, token: &str) {
        self.durable.set(KEY_TOKEN, token);
    }

    pub fn role(&self) -> Option<String> {
        self.durable.get(KEY_ROLE)
    }

    pub fn set_role(&self, role: &str) {
        self.durable.set(KEY_ROLE, role);
    }

    /// Last-activity timestamp as unix millis, if present and parseable.
    pub fn last_activity_millis(&self) -> Option<i64> {
        self.durable.get(KEY_LAST_ACTIVITY)?.parse().ok()
    }

    pub fn set_last_activity_millis(&self, millis: i64) {
        self.durable.set(KEY_LAST_ACTIVITY, &millis.to_string());
    }

    /// Raw identity JSON from the ephemeral store.
    pub fn identity_json(&self) -> Option<String> {
        self.ephemeral.get(KEY_IDENTITY)
    }

    pub fn set_identity_json(&self, json: &str) {
        self.ephemeral.set(KEY_IDENTITY, json);
    }

    /// Remove every session key from both stores. Callers that navigate
    /// afterwards must call this first so a reloaded login view never
    /// observes stale credentials.
    pub fn clear_all(&self) {
        self.durable.remove(KEY_TOKEN);
        self.durable.remove(KEY_ROLE);
        self.durable.remove(KEY_LAST_ACTIVITY);
        self.ephemeral.remove(KEY_IDENTITY);
    }

    /// True when none of the session keys are present in either store.
    pub fn is_empty(&self) -> bool {
        self.token().is_none()
            && self.role().is_none()
            && self.durable.get(KEY_LAST_ACTIVITY).is_none()
            && self.identity_json().is_none()
    }
}
