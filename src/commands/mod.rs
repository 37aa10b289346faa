//! CLI command implementations
//!
//! The binary parses arguments and delegates here; everything below returns
//! [`crate::Result`] so commands can be driven from tests.

pub mod create;
pub mod destroy;
pub mod reset;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::cluster::ClusterRecord;
use crate::config::{default_home, Layout, Timeouts};
use crate::controller::{ClusterController, PipelineContext};
use crate::k8s::create_client;
use crate::provider::create_adapter;
use crate::store::{CheckpointStore, FileStore, SecretStore};
use crate::Result;

/// Checkpoint store backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// JSON files under `<home>/clusters`
    #[default]
    File,
    /// Secret in a bootstrap cluster
    Secret,
}

/// Where cluster records live
#[derive(Args, Clone, Debug, Default)]
pub struct StoreArgs {
    /// State home; defaults to ~/.k1
    #[arg(long, env = "K1_HOME")]
    pub home: Option<PathBuf>,

    /// Checkpoint store backend
    #[arg(long, value_enum, env = "K1_STORE", default_value = "file")]
    pub store: StoreKind,

    /// Kubeconfig of the cluster holding the secret store
    #[arg(long, env = "K1_STORE_KUBECONFIG")]
    pub store_kubeconfig: Option<PathBuf>,

    /// Namespace of the secret store
    #[arg(long, default_value = "kubefirst")]
    pub store_namespace: String,
}

impl StoreArgs {
    /// Working tree for `cluster_name`
    pub fn layout(&self, cluster_name: &str) -> Result<Layout> {
        let home = match &self.home {
            Some(home) => home.clone(),
            None => default_home()?,
        };
        Ok(Layout::new(home, cluster_name))
    }

    /// Open the configured store
    pub async fn open(&self, layout: &Layout) -> Result<Arc<dyn CheckpointStore>> {
        match self.store {
            StoreKind::File => Ok(Arc::new(FileStore::new(layout.records_dir()))),
            StoreKind::Secret => {
                let client = create_client(self.store_kubeconfig.as_deref()).await?;
                Ok(Arc::new(SecretStore::new(client, &self.store_namespace)))
            }
        }
    }
}

/// Controller for an existing record, with real collaborators
fn controller_for(
    record: &ClusterRecord,
    layout: Layout,
    store: Arc<dyn CheckpointStore>,
    timeouts: Timeouts,
) -> Result<ClusterController> {
    let adapter = create_adapter(
        record.cloud_provider.as_str(),
        record.git_provider.as_str(),
        record,
    )?;
    let ctx = PipelineContext::builder(&record.cluster_name, adapter, layout, store)
        .timeouts(timeouts)
        .build()?;
    Ok(ClusterController::new(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_lives_under_the_home_override() {
        let home = tempfile::tempdir().unwrap();
        let args = StoreArgs {
            home: Some(home.path().to_path_buf()),
            ..Default::default()
        };

        let layout = args.layout("demo").unwrap();
        assert_eq!(layout.records_dir(), home.path().join("clusters"));
        assert_eq!(layout.gitops_dir(), home.path().join("demo").join("gitops"));

        let store = args.open(&layout).await.unwrap();
        assert!(store.list_clusters().await.unwrap().is_empty());
    }
}
