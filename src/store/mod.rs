//! Checkpoint store
//!
//! Persists one [`ClusterRecord`] per cluster name. Updates are field-level
//! patches applied with read-modify-write; there is no locking, so only one
//! pipeline may run per cluster name.

mod file;
mod memory;
mod secret;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use secret::SecretStore;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cluster::{ClusterPatch, ClusterRecord};
use crate::Result;

/// Storage for cluster records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch a record; [`crate::Error::NotFound`] if absent
    async fn get_cluster(&self, name: &str) -> Result<ClusterRecord>;

    /// Insert a new record; fails if the name is taken
    async fn insert_cluster(&self, record: &ClusterRecord) -> Result<()>;

    /// Apply a patch and return the updated record
    async fn update_cluster(&self, name: &str, patch: ClusterPatch) -> Result<ClusterRecord>;

    /// Remove a record
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    /// Names of all stored clusters
    async fn list_clusters(&self) -> Result<Vec<String>>;
}
