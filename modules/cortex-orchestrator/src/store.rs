//! The opaque persistence seam. The core is in-memory; an external layer may
//! substitute a durable `Store` for at-least-once durability over the four
//! collections whose schemas the core defines.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use cortex_common::CortexResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Entities,
    Alerts,
    Templates,
    ResponseStats,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Entities => write!(f, "entities"),
            Collection::Alerts => write!(f, "alerts"),
            Collection::Templates => write!(f, "templates"),
            Collection::ResponseStats => write!(f, "response_stats"),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put(
        &self,
        collection: Collection,
        key: &str,
        value: serde_json::Value,
    ) -> CortexResult<()>;

    async fn get(&self, collection: Collection, key: &str)
        -> CortexResult<Option<serde_json::Value>>;

    async fn delete(&self, collection: Collection, key: &str) -> CortexResult<bool>;

    async fn list(&self, collection: Collection) -> CortexResult<Vec<(String, serde_json::Value)>>;
}

/// The default in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, HashMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(
        &self,
        collection: Collection,
        key: &str,
        value: serde_json::Value,
    ) -> CortexResult<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> CortexResult<Option<serde_json::Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(&collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn delete(&self, collection: Collection, key: &str) -> CortexResult<bool> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get_mut(&collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, collection: Collection) -> CortexResult<Vec<(String, serde_json::Value)>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(&collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
