//! `kubefirst create`

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use super::{controller_for, StoreArgs};
use crate::cluster::{CloudCredentials, ClusterRecord, GitProvider};
use crate::config::ClusterDefinition;
use crate::{Error, Result};

/// Arguments for `create`
#[derive(Args, Clone, Debug)]
pub struct CreateArgs {
    /// Cluster definition YAML
    #[arg(short = 'f', long = "config")]
    pub config: PathBuf,

    /// Git provider token; defaults to GITHUB_TOKEN or GITLAB_TOKEN
    #[arg(long)]
    pub git_token: Option<String>,

    /// Store selection
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Create the cluster, resuming from the stored checkpoints if it exists
pub async fn run(args: CreateArgs) -> Result<ClusterRecord> {
    let definition = ClusterDefinition::from_file(&args.config)?;
    definition.validate()?;

    let layout = args.store.layout(&definition.cluster_name)?;
    let store = args.store.open(&layout).await?;

    let record = match store.get_cluster(&definition.cluster_name).await {
        Ok(existing) => existing,
        Err(Error::NotFound(_)) => {
            let git: GitProvider = definition.git_provider.parse()?;
            let token = match args.git_token {
                Some(token) => token,
                None => std::env::var(git.token_env()).unwrap_or_default(),
            };
            definition.to_record(&token, CloudCredentials::from_env())?
        }
        Err(e) => return Err(e),
    };

    info!(
        cluster = %record.cluster_name,
        cloud = %record.cloud_provider,
        git = %record.git_provider,
        "Provisioning cluster"
    );

    let controller = controller_for(&record, layout, store, definition.timeouts.clone())?;
    controller.initialize(record).await?;
    controller.run_create().await
}
