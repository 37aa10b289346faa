//! Destroy pipeline steps
//!
//! Each step is gated on the create checkpoint of the resource it removes
//! and resets that checkpoint (and any that depend on it) once the resource
//! is gone.

use tracing::info;

use crate::argocd::{
    delete_application_with_timeout, ARGOCD_ADMIN_SECRET, ARGOCD_ADMIN_USER, ARGOCD_NAMESPACE,
    REGISTRY_APPLICATION,
};
use crate::cluster::{ClusterRecord, StepId};
use crate::controller::context::PipelineContext;
use crate::k8s::PortForwardTarget;
use crate::ssh::KBOT_KEY_TITLE;
use crate::terraform::{destroy_with_retry, TerraformModule};
use crate::Result;

/// Destroy steps, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyStep {
    /// Delete the registry Application with cascade
    DeleteRegistryApplication,
    /// Delete PVCs so the cloud can release block storage
    DetachBlockStorage,
    /// Destroy the git provider module
    GitTerraformDestroy,
    /// Destroy the cloud module and with it the cluster
    CloudTerraformDestroy,
    /// Remove the bot key registered with the git provider
    DeleteProviderSshKeys,
}

impl DestroyStep {
    /// Fixed destroy order
    pub const ORDER: [DestroyStep; 5] = [
        Self::DeleteRegistryApplication,
        Self::DetachBlockStorage,
        Self::GitTerraformDestroy,
        Self::CloudTerraformDestroy,
        Self::DeleteProviderSshKeys,
    ];

    /// Create checkpoint that must have been attempted for this step to act
    pub fn gate(&self) -> StepId {
        match self {
            Self::DeleteRegistryApplication => StepId::ArgoCDCreateRegistry,
            Self::DetachBlockStorage => StepId::CloudTerraformApply,
            Self::GitTerraformDestroy => StepId::GitTerraformApply,
            Self::CloudTerraformDestroy => StepId::CloudTerraformApply,
            Self::DeleteProviderSshKeys => StepId::KbotSetup,
        }
    }

    /// Checkpoints reset to pending when the step succeeds
    pub fn clears(&self) -> Vec<StepId> {
        match self {
            Self::DeleteRegistryApplication => vec![StepId::ArgoCDCreateRegistry],
            Self::DetachBlockStorage | Self::DeleteProviderSshKeys => vec![],
            // The remote repositories are gone; working copies are rebuilt from the template
            Self::GitTerraformDestroy => vec![
                StepId::RepositoryPrep,
                StepId::GitTerraformApply,
                StepId::RepositoryPush,
            ],
            Self::CloudTerraformDestroy => {
                let mut steps = vec![StepId::CloudTerraformApply];
                steps.extend(StepId::IN_CLUSTER);
                steps
            }
        }
    }

    /// Remove the resource
    pub async fn run(&self, ctx: &PipelineContext, record: &ClusterRecord) -> Result<()> {
        match self {
            Self::DeleteRegistryApplication => delete_registry(ctx, record).await,
            Self::DetachBlockStorage => detach_block_storage(ctx, record).await,
            Self::GitTerraformDestroy => destroy_module(ctx, TerraformModule::Git).await,
            Self::CloudTerraformDestroy => destroy_module(ctx, TerraformModule::Cloud).await,
            Self::DeleteProviderSshKeys => {
                ctx.services
                    .git_api
                    .delete_user_ssh_key(&record.git_auth.token, KBOT_KEY_TITLE)
                    .await
            }
        }
    }
}

impl std::fmt::Display for DestroyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DeleteRegistryApplication => "DeleteRegistryApplication",
            Self::DetachBlockStorage => "DetachBlockStorage",
            Self::GitTerraformDestroy => "GitTerraformDestroy",
            Self::CloudTerraformDestroy => "CloudTerraformDestroy",
            Self::DeleteProviderSshKeys => "DeleteProviderSshKeys",
        };
        f.write_str(name)
    }
}

async fn delete_registry(ctx: &PipelineContext, record: &ClusterRecord) -> Result<()> {
    let kube = ctx.connect(record).await?;
    let forward = kube.port_forward(PortForwardTarget::argocd()).await?;
    let api = ctx.services.argocd.clone();

    let password = if record.argocd_password.is_empty() {
        kube.read_secret(ARGOCD_NAMESPACE, ARGOCD_ADMIN_SECRET)
            .await?
            .and_then(|data| data.get("password").cloned())
            .unwrap_or_default()
    } else {
        record.argocd_password.clone()
    };
    // Session tokens expire; the one stored at create time is never reused.
    let token = api
        .create_session(forward.url(), ARGOCD_ADMIN_USER, &password)
        .await?;

    delete_application_with_timeout(
        api,
        forward.url().to_string(),
        token,
        REGISTRY_APPLICATION.to_string(),
        ctx.timeouts.argocd_delete(),
        ctx.poll_interval,
    )
    .await
}

async fn detach_block_storage(ctx: &PipelineContext, record: &ClusterRecord) -> Result<()> {
    let kube = ctx.connect(record).await?;
    let deleted = kube.delete_persistent_volume_claims().await?;
    info!(cluster = %record.cluster_name, claims = deleted, "Deleted persistent volume claims");
    kube.wait_for_volumes_released(ctx.timeouts.volume_release())
        .await
}

async fn destroy_module(ctx: &PipelineContext, module: TerraformModule) -> Result<()> {
    let dir = ctx.terraform_dir(module);
    info!(cluster = %ctx.cluster_name, module = %module, "Destroying Terraform module");
    destroy_with_retry(
        ctx.services.terraform.as_ref(),
        &ctx.terraform_policy(),
        &dir,
        move || async move {
            let record = ctx.reload().await?;
            ctx.adapter.destroy_env(module, &record, &ctx.layout)
        },
    )
    .await
}
