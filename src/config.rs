//! Cluster definition, working-directory layout and wait budgets

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cluster::{
    generate_cluster_id, Checkpoints, CloudCredentials, CloudProvider, ClusterRecord,
    ClusterStatus, ClusterType, DnsProvider, GitAuth, GitProtocol, GitProvider,
    StateStoreCredentials, StateStoreDetails, VaultAuth,
};
use crate::{Error, Result};

/// Default template repository
pub const DEFAULT_GITOPS_TEMPLATE_URL: &str = "https://github.com/kubefirst/gitops-template.git";
/// Default template branch
pub const DEFAULT_GITOPS_TEMPLATE_BRANCH: &str = "main";

/// Operator-supplied description of the cluster to create
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterDefinition {
    /// Unique cluster name
    pub cluster_name: String,
    /// mgmt or workload
    pub cluster_type: ClusterType,
    /// aws, azure, google, civo, digitalocean, vultr or k3d
    pub cloud_provider: String,
    /// github or gitlab
    pub git_provider: String,
    /// https or ssh
    pub git_protocol: GitProtocol,
    /// Owner of the gitops and metaphor repositories
    pub git_owner: String,
    /// Cloud region
    pub cloud_region: String,
    /// Apex domain
    pub domain_name: String,
    /// Optional subdomain
    pub subdomain_name: Option<String>,
    /// cloud or cloudflare
    pub dns_provider: DnsProvider,
    /// Use the Cloudflare origin issuer
    pub use_cloudflare_origin_issuer: bool,
    /// Alerts email
    pub alerts_email: String,
    /// Worker node instance type
    pub node_type: Option<String>,
    /// Worker node count
    pub node_count: Option<u32>,
    /// Template repository
    pub gitops_template_url: Option<String>,
    /// Template branch
    pub gitops_template_branch: Option<String>,
    /// Wait budgets
    pub timeouts: Timeouts,
}

impl ClusterDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Reject definitions that cannot be provisioned
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::configuration("cluster name is required"));
        }
        if !self
            .cluster_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::configuration(format!(
                "cluster name '{}' must be lowercase alphanumeric or '-'",
                self.cluster_name
            )));
        }
        let cloud: CloudProvider = self.cloud_provider.parse()?;
        self.git_provider.parse::<GitProvider>()?;
        if self.git_owner.is_empty() {
            return Err(Error::configuration("git owner is required"));
        }
        if !cloud.is_local() && self.domain_name.is_empty() {
            return Err(Error::configuration(format!(
                "domain name is required for {cloud}"
            )));
        }
        if self.use_cloudflare_origin_issuer && self.dns_provider != DnsProvider::Cloudflare {
            return Err(Error::configuration(
                "the Cloudflare origin issuer requires dnsProvider: cloudflare",
            ));
        }
        Ok(())
    }

    /// Build a fresh record with a new cluster ID
    pub fn to_record(&self, git_token: &str, cloud: CloudCredentials) -> Result<ClusterRecord> {
        self.validate()?;
        let now = Utc::now();
        let cloud_provider: CloudProvider = self.cloud_provider.parse()?;

        Ok(ClusterRecord {
            cluster_name: self.cluster_name.clone(),
            cluster_id: generate_cluster_id(),
            cluster_type: self.cluster_type,
            cloud_provider,
            git_provider: self.git_provider.parse()?,
            git_protocol: self.git_protocol,
            cloud_region: self.cloud_region.clone(),
            domain_name: if cloud_provider.is_local() && self.domain_name.is_empty() {
                "kubefirst.dev".to_string()
            } else {
                self.domain_name.clone()
            },
            subdomain_name: self.subdomain_name.clone(),
            dns_provider: self.dns_provider,
            use_cloudflare_origin_issuer: self.use_cloudflare_origin_issuer,
            alerts_email: self.alerts_email.clone(),
            node_type: self.node_type.clone(),
            node_count: self.node_count,
            gitops_template_url: self
                .gitops_template_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GITOPS_TEMPLATE_URL.to_string()),
            gitops_template_branch: self
                .gitops_template_branch
                .clone()
                .unwrap_or_else(|| DEFAULT_GITOPS_TEMPLATE_BRANCH.to_string()),
            git_auth: GitAuth {
                owner: self.git_owner.clone(),
                user: self.git_owner.clone(),
                token: git_token.to_string(),
                ..Default::default()
            },
            cloud,
            vault_auth: VaultAuth::default(),
            state_store_credentials: StateStoreCredentials::from_env(),
            state_store_details: StateStoreDetails::default(),
            webhook_secret: String::new(),
            argocd_password: String::new(),
            argocd_auth_token: String::new(),
            platform_api_token: String::new(),
            kms_key_id: String::new(),
            kubeconfig_path: String::new(),
            checkpoints: Checkpoints::default(),
            status: ClusterStatus::Provisioning,
            in_progress: true,
            last_condition: String::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Wait budgets, in seconds
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    /// Deployment readiness (ArgoCD, final checks)
    pub deployment_secs: u64,
    /// Vault pod start and unseal
    pub vault_secs: u64,
    /// Registry application deletion
    pub argocd_delete_secs: u64,
    /// PersistentVolume release after PVC deletion
    pub volume_release_secs: u64,
    /// DNS propagation of the ArgoCD host
    pub domain_liveness_secs: u64,
    /// Wait between Terraform attempts
    pub terraform_retry_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deployment_secs: 600,
            vault_secs: 600,
            argocd_delete_secs: 600,
            volume_release_secs: 300,
            domain_liveness_secs: 600,
            terraform_retry_secs: 10,
        }
    }
}

impl Timeouts {
    /// Deployment readiness budget
    pub fn deployment(&self) -> Duration {
        Duration::from_secs(self.deployment_secs)
    }

    /// Vault budget
    pub fn vault(&self) -> Duration {
        Duration::from_secs(self.vault_secs)
    }

    /// Registry deletion budget
    pub fn argocd_delete(&self) -> Duration {
        Duration::from_secs(self.argocd_delete_secs)
    }

    /// Volume release budget
    pub fn volume_release(&self) -> Duration {
        Duration::from_secs(self.volume_release_secs)
    }

    /// Domain liveness budget
    pub fn domain_liveness(&self) -> Duration {
        Duration::from_secs(self.domain_liveness_secs)
    }

    /// Terraform retry delay
    pub fn terraform_retry(&self) -> Duration {
        Duration::from_secs(self.terraform_retry_secs)
    }
}

/// Local working directory tree for one cluster
///
/// ```text
/// <home>/
///   clusters/<name>.json     checkpoint records (file store)
///   <name>/
///     templates/             cloned template repository
///     gitops/                rendered gitops repository
///     metaphor/              rendered sample application
///     kubeconfig
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    home: PathBuf,
    cluster_name: String,
}

impl Layout {
    /// Layout under `home`
    pub fn new(home: impl Into<PathBuf>, cluster_name: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Layout under `$K1_HOME` or `~/.k1`
    pub fn for_cluster(cluster_name: &str) -> Result<Self> {
        Ok(Self::new(default_home()?, cluster_name))
    }

    /// State home
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// File-store directory
    pub fn records_dir(&self) -> PathBuf {
        self.home.join("clusters")
    }

    /// Per-cluster root
    pub fn cluster_dir(&self) -> PathBuf {
        self.home.join(&self.cluster_name)
    }

    /// Cloned template repository
    pub fn templates_dir(&self) -> PathBuf {
        self.cluster_dir().join("templates")
    }

    /// Rendered gitops repository
    pub fn gitops_dir(&self) -> PathBuf {
        self.cluster_dir().join("gitops")
    }

    /// Rendered metaphor repository
    pub fn metaphor_dir(&self) -> PathBuf {
        self.cluster_dir().join("metaphor")
    }

    /// Terraform root module directory
    pub fn terraform_dir(&self, module_dir: &str) -> PathBuf {
        self.gitops_dir().join("terraform").join(module_dir)
    }

    /// Registry directory of this cluster inside the gitops tree
    pub fn registry_dir(&self) -> PathBuf {
        self.gitops_dir()
            .join("registry")
            .join("clusters")
            .join(&self.cluster_name)
    }

    /// Kubeconfig written by the cloud module
    pub fn kubeconfig(&self) -> PathBuf {
        self.cluster_dir().join("kubeconfig")
    }
}

/// `$K1_HOME` or `~/.k1`
pub fn default_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("K1_HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".k1"))
        .ok_or_else(|| Error::configuration("cannot determine home directory"))
}
