//! Pipeline steps
//!
//! A step reads the [`PipelineContext`] and the current record, performs its
//! side effects and returns a [`StepOutput`]. Steps never write to the store;
//! the controller merges their output and moves the checkpoint.

mod create;
mod destroy;

pub use destroy::DestroyStep;

use async_trait::async_trait;

use super::context::PipelineContext;
use crate::cluster::{ClusterRecord, StepId, StepOutput};
use crate::{Error, Result};

/// One checkpoint-gated unit of the create pipeline
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Checkpoint guarding this step
    fn id(&self) -> StepId;

    /// Perform the step's side effects
    async fn run(&self, ctx: &PipelineContext, record: &ClusterRecord) -> Result<StepOutput>;
}

#[async_trait]
impl PipelineStep for StepId {
    fn id(&self) -> StepId {
        *self
    }

    async fn run(&self, ctx: &PipelineContext, record: &ClusterRecord) -> Result<StepOutput> {
        match self {
            StepId::GitInit => create::git_init(ctx, record).await,
            StepId::KbotSetup => create::kbot_setup(record),
            StepId::StateStoreCreate => create::state_store_create(ctx, record).await,
            StepId::RepositoryPrep => create::repository_prep(ctx, record).await,
            StepId::GitTerraformApply => create::git_terraform_apply(ctx).await,
            StepId::RepositoryPush => create::repository_push(ctx, record).await,
            StepId::CloudTerraformApply => create::cloud_terraform_apply(ctx).await,
            StepId::ClusterSecretsBootstrap => create::cluster_secrets_bootstrap(ctx, record).await,
            StepId::ArgoCDInstall => create::argocd_install(ctx, record).await,
            StepId::ArgoCDInitialize => create::argocd_initialize(ctx, record).await,
            StepId::ArgoCDCreateRegistry => create::argocd_create_registry(ctx, record).await,
            StepId::VaultInitialize => create::vault_initialize(ctx, record).await,
            StepId::VaultTerraformApply => create::vault_terraform_apply(ctx, record).await,
            StepId::UsersTerraformApply => create::users_terraform_apply(ctx, record).await,
            StepId::Final => create::final_check(ctx, record).await,
        }
    }
}

/// Run synchronous filesystem or git work off the async runtime
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
}
