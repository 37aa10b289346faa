//! In-process store used by tests and dry runs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::CheckpointStore;
use crate::cluster::{ClusterPatch, ClusterRecord};
use crate::{Error, Result};

/// Records held in memory; clones share state
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, ClusterRecord>>>,
    patches: Arc<Mutex<Vec<ClusterPatch>>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one record
    pub fn with_record(record: ClusterRecord) -> Self {
        let store = Self::default();
        if let Ok(mut records) = store.records.lock() {
            records.insert(record.cluster_name.clone(), record);
        }
        store
    }

    /// Every patch applied so far, in order
    pub fn patches(&self) -> Vec<ClusterPatch> {
        self.patches.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, ClusterRecord>>> {
        self.records
            .lock()
            .map_err(|e| Error::store(format!("memory store poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_cluster(&self, name: &str) -> Result<ClusterRecord> {
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn insert_cluster(&self, record: &ClusterRecord) -> Result<()> {
        let mut records = self.lock()?;
        if records.contains_key(&record.cluster_name) {
            return Err(Error::store(format!(
                "cluster {} already exists",
                record.cluster_name
            )));
        }
        records.insert(record.cluster_name.clone(), record.clone());
        Ok(())
    }

    async fn update_cluster(&self, name: &str, patch: ClusterPatch) -> Result<ClusterRecord> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        record.apply(&patch)?;
        let updated = record.clone();
        drop(records);

        if let Ok(mut patches) = self.patches.lock() {
            patches.push(patch);
        }
        Ok(updated)
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
