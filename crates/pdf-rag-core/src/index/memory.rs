//! In-memory [`VectorIndex`] implementation for tests and embedded use.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::IndexedPassage;

use super::{top_k_by_cosine, CollectionInfo, IndexHit, VectorIndex};

struct StoredCollection {
    info: CollectionInfo,
    entries: Vec<IndexedPassage>,
}

/// In-memory index; contents are lost when dropped.
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        Ok(guard.get(collection).map(|c| c.info.clone()))
    }

    async fn replace_collection(
        &self,
        info: &CollectionInfo,
        entries: &[IndexedPassage],
    ) -> Result<()> {
        let stored = StoredCollection {
            info: info.clone(),
            entries: entries.to_vec(),
        };
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        guard.insert(info.name.clone(), stored);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        let Some(stored) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(top_k_by_cosine(
            query_vec,
            stored.entries.iter().cloned(),
            limit,
        ))
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        Ok(guard.remove(collection).is_some())
    }
}
