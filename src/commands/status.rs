//! `kubefirst status`

use std::fmt::Write;

use clap::Args;

use super::StoreArgs;
use crate::cluster::{ClusterRecord, StepStatus};
use crate::Result;

/// Arguments for `status`
#[derive(Args, Clone, Debug)]
pub struct StatusArgs {
    /// Cluster to show; lists every stored cluster when omitted
    pub cluster_name: Option<String>,

    /// Store selection
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Human-readable status report
pub async fn run(args: StatusArgs) -> Result<String> {
    let name = args.cluster_name.as_deref().unwrap_or_default();
    let layout = args.store.layout(name)?;
    let store = args.store.open(&layout).await?;

    match &args.cluster_name {
        Some(name) => Ok(render(&store.get_cluster(name).await?)),
        None => {
            let names = store.list_clusters().await?;
            if names.is_empty() {
                return Ok("no clusters\n".to_string());
            }
            Ok(names.into_iter().map(|n| n + "\n").collect())
        }
    }
}

/// Status of one record: identity, lifecycle and every checkpoint
pub fn render(record: &ClusterRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cluster:     {} ({})", record.cluster_name, record.cluster_id);
    let _ = writeln!(
        out,
        "providers:   {} / {}",
        record.cloud_provider, record.git_provider
    );
    let _ = writeln!(out, "domain:      {}", record.full_domain());
    let _ = writeln!(out, "status:      {}", record.status);
    let _ = writeln!(out, "in progress: {}", record.in_progress);
    if !record.last_condition.is_empty() {
        let _ = writeln!(out, "last error:  {}", record.last_condition);
    }
    let _ = writeln!(out, "checkpoints:");
    for (step, status) in record.checkpoints.in_order() {
        let mark = match status {
            StepStatus::Done => "done",
            StepStatus::Failed => "FAILED",
            StepStatus::Pending => "pending",
        };
        let _ = writeln!(out, "  {:<28} {mark}", step.to_string());
    }
    out
}
