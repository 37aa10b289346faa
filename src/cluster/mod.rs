//! Cluster record: the single unit of orchestration state
//!
//! The record is created once per cluster name, mutated by pipeline steps
//! through [`ClusterPatch`], and is the only state that survives a crash.

mod checkpoint;
mod credentials;
mod types;

pub use checkpoint::{Checkpoints, StepId, StepStatus};
pub use credentials::{
    AwsAuth, AzureAuth, CivoAuth, CloudCredentials, CloudflareAuth, DigitalOceanAuth, GitAuth,
    GoogleAuth, StateStoreCredentials, StateStoreDetails, VaultAuth, VultrAuth,
};
pub use types::{ClusterStatus, ClusterType, CloudProvider, DnsProvider, GitProtocol, GitProvider};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ssh::KbotKeys;
use crate::{Error, Result};

/// Length of generated cluster IDs
pub const CLUSTER_ID_LEN: usize = 6;

/// Generate an opaque lowercase alphanumeric cluster ID
pub fn generate_cluster_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..CLUSTER_ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Persisted orchestration state for one cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClusterRecord {
    /// Unique key in the checkpoint store
    pub cluster_name: String,
    /// Assigned once when the record is created
    pub cluster_id: String,
    /// Management or workload
    #[serde(default)]
    pub cluster_type: ClusterType,

    /// Cloud provider
    pub cloud_provider: CloudProvider,
    /// Git provider
    pub git_provider: GitProvider,
    /// Protocol for repository URLs
    #[serde(default)]
    pub git_protocol: GitProtocol,
    /// Cloud region
    pub cloud_region: String,
    /// Apex domain
    pub domain_name: String,
    /// Optional subdomain prefix for every platform host
    #[serde(default)]
    pub subdomain_name: Option<String>,
    /// DNS provider
    #[serde(default)]
    pub dns_provider: DnsProvider,
    /// Use the Cloudflare origin issuer instead of Let's Encrypt
    #[serde(default)]
    pub use_cloudflare_origin_issuer: bool,
    /// Address for certificate and alert notifications
    #[serde(default)]
    pub alerts_email: String,
    /// Worker node instance type
    #[serde(default)]
    pub node_type: Option<String>,
    /// Worker node count
    #[serde(default)]
    pub node_count: Option<u32>,
    /// Template repository cloned during repository prep
    pub gitops_template_url: String,
    /// Template branch or tag
    pub gitops_template_branch: String,

    /// Git provider identity and bot keypair
    #[serde(default)]
    pub git_auth: GitAuth,
    /// Cloud credential bundles
    #[serde(default)]
    pub cloud: CloudCredentials,
    /// Vault root credentials
    #[serde(default)]
    pub vault_auth: VaultAuth,
    /// Terraform backend credentials
    #[serde(default)]
    pub state_store_credentials: StateStoreCredentials,
    /// Terraform backend bucket
    #[serde(default)]
    pub state_store_details: StateStoreDetails,

    /// Shared secret for repository webhooks
    #[serde(default)]
    pub webhook_secret: String,
    /// ArgoCD admin password
    #[serde(default)]
    pub argocd_password: String,
    /// ArgoCD session token
    #[serde(default)]
    pub argocd_auth_token: String,
    /// Token written to `kubefirst/kubefirst-initial-secrets`
    #[serde(default)]
    pub platform_api_token: String,
    /// KMS key ID output by the cloud module
    #[serde(default)]
    pub kms_key_id: String,
    /// Kubeconfig of the provisioned cluster
    #[serde(default)]
    pub kubeconfig_path: String,

    /// Per-step checkpoints
    #[serde(default)]
    pub checkpoints: Checkpoints,
    /// Lifecycle status
    #[serde(default)]
    pub status: ClusterStatus,
    /// Whether a pipeline is running against this record
    #[serde(default)]
    pub in_progress: bool,
    /// Message of the last failure, empty after success
    #[serde(default)]
    pub last_condition: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl ClusterRecord {
    /// Domain every platform host lives under
    pub fn full_domain(&self) -> String {
        match self.subdomain_name.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{sub}.{}", self.domain_name),
            _ => self.domain_name.clone(),
        }
    }

    /// `https://<service>.<domain>`
    pub fn ingress_url(&self, service: &str) -> String {
        format!("https://{service}.{}", self.full_domain())
    }

    /// Apply a patch and bump `updated_at`
    ///
    /// Fails without modifying the record if the patch would overwrite the
    /// bot keypair or webhook secret.
    pub fn apply(&mut self, patch: &ClusterPatch) -> Result<()> {
        let out = &patch.output;

        if let Some(keys) = &out.kbot_keys {
            if self.git_auth.has_keypair() && self.git_auth.public_key != keys.public_key {
                return Err(Error::configuration(format!(
                    "cluster {}: bot keypair already generated and cannot be replaced",
                    self.cluster_name
                )));
            }
        }
        if let Some(secret) = &out.webhook_secret {
            if !self.webhook_secret.is_empty() && &self.webhook_secret != secret {
                return Err(Error::configuration(format!(
                    "cluster {}: webhook secret already generated and cannot be replaced",
                    self.cluster_name
                )));
            }
        }

        if let Some(keys) = &out.kbot_keys {
            self.git_auth.public_key = keys.public_key.clone();
            self.git_auth.private_key = keys.private_key.clone();
        }
        if let Some(secret) = &out.webhook_secret {
            self.webhook_secret = secret.clone();
        }
        if let Some(details) = &out.state_store_details {
            self.state_store_details = details.clone();
        }
        if let Some(creds) = &out.state_store_credentials {
            self.state_store_credentials = creds.clone();
        }
        if let Some(v) = &out.kms_key_id {
            self.kms_key_id = v.clone();
        }
        if let Some(v) = &out.kubeconfig_path {
            self.kubeconfig_path = v.clone();
        }
        if let Some(v) = &out.argocd_password {
            self.argocd_password = v.clone();
        }
        if let Some(v) = &out.argocd_auth_token {
            self.argocd_auth_token = v.clone();
        }
        if let Some(v) = &out.platform_api_token {
            self.platform_api_token = v.clone();
        }
        if let Some(v) = &out.vault_auth {
            self.vault_auth = v.clone();
        }
        if let Some(v) = out.status {
            self.status = v;
        }
        if let Some(v) = out.in_progress {
            self.in_progress = v;
        }

        for (step, status) in &patch.checkpoints {
            self.checkpoints.set(*step, *status);
        }
        if let Some(condition) = &patch.last_condition {
            self.last_condition = condition.clone();
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Fields a step produces; merged into the record by the executor
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutput {
    /// Generated bot keypair
    pub kbot_keys: Option<KbotKeys>,
    /// Generated webhook secret
    pub webhook_secret: Option<String>,
    /// Created state-store bucket
    pub state_store_details: Option<StateStoreDetails>,
    /// Backend credentials issued with the bucket
    pub state_store_credentials: Option<StateStoreCredentials>,
    /// KMS key ID
    pub kms_key_id: Option<String>,
    /// Kubeconfig path
    pub kubeconfig_path: Option<String>,
    /// ArgoCD admin password
    pub argocd_password: Option<String>,
    /// ArgoCD session token
    pub argocd_auth_token: Option<String>,
    /// Platform API token
    pub platform_api_token: Option<String>,
    /// Vault root credentials
    pub vault_auth: Option<VaultAuth>,
    /// New lifecycle status
    pub status: Option<ClusterStatus>,
    /// New in-progress flag
    pub in_progress: Option<bool>,
}

/// A single logical update to a cluster record
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterPatch {
    /// Output fields to merge
    pub output: StepOutput,
    /// Checkpoint transitions
    pub checkpoints: Vec<(StepId, StepStatus)>,
    /// New last-condition message
    pub last_condition: Option<String>,
}

impl ClusterPatch {
    /// Step succeeded: merge its output and mark it done
    pub fn completed(step: StepId, output: StepOutput) -> Self {
        Self {
            output,
            checkpoints: vec![(step, StepStatus::Done)],
            last_condition: Some(String::new()),
        }
    }

    /// Step failed: mark it failed and record why
    pub fn failed(step: StepId, message: impl Into<String>) -> Self {
        Self {
            output: StepOutput {
                status: Some(ClusterStatus::Error),
                in_progress: Some(false),
                ..Default::default()
            },
            checkpoints: vec![(step, StepStatus::Failed)],
            last_condition: Some(message.into()),
        }
    }

    /// Destroy step succeeded: reset the given checkpoints to pending
    pub fn cleared(steps: &[StepId], output: StepOutput) -> Self {
        Self {
            output,
            checkpoints: steps.iter().map(|s| (*s, StepStatus::Pending)).collect(),
            last_condition: Some(String::new()),
        }
    }

    /// Status transition without checkpoint changes
    pub fn status(status: ClusterStatus, in_progress: bool) -> Self {
        Self {
            output: StepOutput {
                status: Some(status),
                in_progress: Some(in_progress),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Run aborted outside a create step
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            last_condition: Some(message.into()),
            ..Self::status(ClusterStatus::Error, false)
        }
    }
}
