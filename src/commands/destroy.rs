//! `kubefirst destroy`

use clap::Args;

use super::{controller_for, StoreArgs};
use crate::cluster::ClusterRecord;
use crate::config::Timeouts;
use crate::Result;

/// Arguments for `destroy`
#[derive(Args, Clone, Debug)]
pub struct DestroyArgs {
    /// Cluster to tear down
    pub cluster_name: String,

    /// Store selection
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Run the destroy pipeline for a stored cluster
pub async fn run(args: DestroyArgs) -> Result<ClusterRecord> {
    let layout = args.store.layout(&args.cluster_name)?;
    let store = args.store.open(&layout).await?;
    let record = store.get_cluster(&args.cluster_name).await?;

    let controller = controller_for(&record, layout, store, Timeouts::default())?;
    controller.run_destroy().await
}
