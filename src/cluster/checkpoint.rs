//! Per-step checkpoints
//!
//! Each create step owns one entry in the checkpoint map. A missing entry
//! reads as [`StepStatus::Pending`]. Destroy steps reuse the entry of the
//! step that created the resource: they act while it is not pending and
//! reset it to pending once the resource is gone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Create pipeline steps, in execution order
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
    /// Validate git credentials and that target repositories are absent
    #[serde(rename = "GitInitCheck")]
    GitInit,
    /// Generate bot SSH keypair and webhook secret
    #[serde(rename = "KbotSetupCheck")]
    KbotSetup,
    /// Create the Terraform state-store bucket
    #[serde(rename = "StateStoreCreateCheck")]
    StateStoreCreate,
    /// Clone templates and detokenize the gitops and metaphor trees
    #[serde(rename = "GitopsReadyCheck")]
    RepositoryPrep,
    /// Apply the git provider Terraform module
    #[serde(rename = "GitTerraformApplyCheck")]
    GitTerraformApply,
    /// Commit and push the prepared repositories
    #[serde(rename = "GitopsPushedCheck")]
    RepositoryPush,
    /// Apply the cloud Terraform module (creates the cluster)
    #[serde(rename = "CloudTerraformApplyCheck")]
    CloudTerraformApply,
    /// Create namespaces and bootstrap secrets
    #[serde(rename = "ClusterSecretsCreatedCheck")]
    ClusterSecretsBootstrap,
    /// Install ArgoCD
    #[serde(rename = "ArgoCDInstallCheck")]
    ArgoCDInstall,
    /// Read the ArgoCD admin password and create an auth token
    #[serde(rename = "ArgoCDInitializeCheck")]
    ArgoCDInitialize,
    /// Create the registry Application
    #[serde(rename = "ArgoCDCreateRegistryCheck")]
    ArgoCDCreateRegistry,
    /// Initialize and unseal Vault
    #[serde(rename = "VaultInitializedCheck")]
    VaultInitialize,
    /// Apply the Vault Terraform module
    #[serde(rename = "VaultTerraformApplyCheck")]
    VaultTerraformApply,
    /// Apply the users Terraform module
    #[serde(rename = "UsersTerraformApplyCheck")]
    UsersTerraformApply,
    /// Readiness and liveness checks
    #[serde(rename = "FinalCheck")]
    Final,
}

impl StepId {
    /// Fixed create order
    pub const CREATE_ORDER: [StepId; 15] = [
        Self::GitInit,
        Self::KbotSetup,
        Self::StateStoreCreate,
        Self::RepositoryPrep,
        Self::GitTerraformApply,
        Self::RepositoryPush,
        Self::CloudTerraformApply,
        Self::ClusterSecretsBootstrap,
        Self::ArgoCDInstall,
        Self::ArgoCDInitialize,
        Self::ArgoCDCreateRegistry,
        Self::VaultInitialize,
        Self::VaultTerraformApply,
        Self::UsersTerraformApply,
        Self::Final,
    ];

    /// Checkpoints describing resources that live inside the cluster
    pub const IN_CLUSTER: [StepId; 8] = [
        Self::ClusterSecretsBootstrap,
        Self::ArgoCDInstall,
        Self::ArgoCDInitialize,
        Self::ArgoCDCreateRegistry,
        Self::VaultInitialize,
        Self::VaultTerraformApply,
        Self::UsersTerraformApply,
        Self::Final,
    ];

    /// Persisted flag name
    pub fn legacy_flag(&self) -> &'static str {
        match self {
            Self::GitInit => "GitInitCheck",
            Self::KbotSetup => "KbotSetupCheck",
            Self::StateStoreCreate => "StateStoreCreateCheck",
            Self::RepositoryPrep => "GitopsReadyCheck",
            Self::GitTerraformApply => "GitTerraformApplyCheck",
            Self::RepositoryPush => "GitopsPushedCheck",
            Self::CloudTerraformApply => "CloudTerraformApplyCheck",
            Self::ClusterSecretsBootstrap => "ClusterSecretsCreatedCheck",
            Self::ArgoCDInstall => "ArgoCDInstallCheck",
            Self::ArgoCDInitialize => "ArgoCDInitializeCheck",
            Self::ArgoCDCreateRegistry => "ArgoCDCreateRegistryCheck",
            Self::VaultInitialize => "VaultInitializedCheck",
            Self::VaultTerraformApply => "VaultTerraformApplyCheck",
            Self::UsersTerraformApply => "UsersTerraformApplyCheck",
            Self::Final => "FinalCheck",
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.legacy_flag())
    }
}

/// Outcome of the most recent attempt at a step
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not attempted, or torn down by the destroy pipeline
    #[default]
    Pending,
    /// Completed; side effects will not run again
    Done,
    /// Attempted and failed; retried on the next run
    Failed,
}

/// Step checkpoint map
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Checkpoints(BTreeMap<StepId, StepStatus>);

impl Checkpoints {
    /// Status of a step; absent entries are pending
    pub fn get(&self, step: StepId) -> StepStatus {
        self.0.get(&step).copied().unwrap_or_default()
    }

    /// Whether the step completed
    pub fn is_done(&self, step: StepId) -> bool {
        self.get(step) == StepStatus::Done
    }

    /// Whether the step has been attempted at all
    pub fn attempted(&self, step: StepId) -> bool {
        self.get(step) != StepStatus::Pending
    }

    /// Set a step's status
    pub fn set(&mut self, step: StepId, status: StepStatus) {
        self.0.insert(step, status);
    }

    /// Steps currently marked failed
    pub fn failed(&self) -> Vec<StepId> {
        self.0
            .iter()
            .filter(|(_, status)| **status == StepStatus::Failed)
            .map(|(step, _)| *step)
            .collect()
    }

    /// All steps in create order with their status
    pub fn in_order(&self) -> impl Iterator<Item = (StepId, StepStatus)> + '_ {
        StepId::CREATE_ORDER
            .into_iter()
            .map(move |step| (step, self.get(step)))
    }
}
