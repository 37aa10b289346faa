//! `kubefirst reset`

use clap::Args;

use super::{controller_for, StoreArgs};
use crate::cluster::StepId;
use crate::config::Timeouts;
use crate::Result;

/// Arguments for `reset`
#[derive(Args, Clone, Debug)]
pub struct ResetArgs {
    /// Cluster whose failed checkpoints are cleared
    pub cluster_name: String,

    /// Store selection
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Return failed checkpoints to pending so the next `create` retries them
pub async fn run(args: ResetArgs) -> Result<Vec<StepId>> {
    let layout = args.store.layout(&args.cluster_name)?;
    let store = args.store.open(&layout).await?;
    let record = store.get_cluster(&args.cluster_name).await?;

    let controller = controller_for(&record, layout, store, Timeouts::default())?;
    controller.reset_failed().await
}
