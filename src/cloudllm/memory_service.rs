//! Scoped key/value memory facade.
//!
//! Grounded on `shandu/services/memory.py`: a thin wrapper around a
//! [`MemoryStore`] that records the `author` of each write as a
//! [`MemoryNote`] without otherwise changing the store's behavior. An
//! in-memory [`InMemoryStore`] implementation is provided for tests and
//! standalone use; production callers are expected to supply their own
//! durable [`MemoryStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::cloudllm::contracts::MemoryNote;
use crate::cloudllm::interfaces::MemoryStore;

/// A process-local, non-persistent [`MemoryStore`].
///
/// `search` performs a substring match of `query` against stored keys within
/// the scope, mirroring the prefix/substring semantics the orchestrator
/// relies on when it asks for `"iteration"` context.
#[derive(Default)]
pub struct InMemoryStore {
    scopes: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn write(&self, scope: &str, key: &str, value: serde_json::Value) {
        let mut scopes = self.scopes.lock().expect("memory store mutex poisoned");
        scopes
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    async fn read(&self, scope: &str, key: &str) -> Option<serde_json::Value> {
        let scopes = self.scopes.lock().expect("memory store mutex poisoned");
        scopes.get(scope).and_then(|entries| entries.get(key)).cloned()
    }

    async fn search(&self, scope: &str, query: &str) -> Vec<(String, serde_json::Value)> {
        let scopes = self.scopes.lock().expect("memory store mutex poisoned");
        let Some(entries) = scopes.get(scope) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(key, _)| key.contains(query))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    async fn reset(&self, scope: &str) {
        let mut scopes = self.scopes.lock().expect("memory store mutex poisoned");
        scopes.remove(scope);
    }
}

/// Author-tracking facade over a [`MemoryStore`], used by every component
/// that needs to read or write run-scoped state.
#[derive(Clone)]
pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn write(
        &self,
        scope: &str,
        key: &str,
        value: serde_json::Value,
        author: &str,
    ) -> MemoryNote {
        self.store.write(scope, key, value.clone()).await;
        MemoryNote {
            key: key.to_string(),
            scope: scope.to_string(),
            value,
            author: author.to_string(),
            updated_at: Utc::now(),
        }
    }

    pub async fn read(&self, scope: &str, key: &str) -> Option<serde_json::Value> {
        self.store.read(scope, key).await
    }

    pub async fn search(&self, scope: &str, query: &str) -> Vec<(String, serde_json::Value)> {
        self.store.search(scope, query).await
    }

    pub async fn reset(&self, scope: &str) {
        self.store.reset(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn search_matches_keys_containing_the_query() {
        let memory = MemoryService::new(Arc::new(InMemoryStore::new()));
        memory.write("run:1", "iteration:0:plan", json!({"ok": true}), "lead").await;
        memory.write("run:1", "status", json!("running"), "orchestrator").await;

        let found = memory.search("run:1", "iteration").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "iteration:0:plan");
    }

    #[tokio::test]
    async fn reset_clears_the_whole_scope() {
        let memory = MemoryService::new(Arc::new(InMemoryStore::new()));
        memory.write("run:1", "status", json!("running"), "orchestrator").await;
        memory.reset("run:1").await;
        assert_eq!(memory.read("run:1", "status").await, None);
    }
}
