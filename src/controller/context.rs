//! Immutable inputs shared by every pipeline step

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::argocd::{ArgoCdApi, ArgoCdClient};
use crate::cluster::ClusterRecord;
use crate::config::{Layout, Timeouts};
use crate::detokenize::{Detokenizer, LiteralDetokenizer};
use crate::git::{create_git_provider_api, Git2Ops, GitOps, GitProviderApi};
use crate::k8s::{KubeClientConnector, KubeConnector, KubeOps, DEFAULT_POLL_INTERVAL};
use crate::probe::{DnsProbe, HealthProbe};
use crate::provider::ProviderAdapter;
use crate::retry::RetryConfig;
use crate::state_store::{CliStateStore, StateStoreProvisioner};
use crate::store::CheckpointStore;
use crate::terraform::{TerraformCli, TerraformModule, TerraformRunner};
use crate::vault::{VaultApi, VaultClient};
use crate::Result;

/// External collaborators, each behind a trait
#[derive(Clone)]
pub struct Services {
    /// Checkpoint store
    pub store: Arc<dyn CheckpointStore>,
    /// Terraform CLI
    pub terraform: Arc<dyn TerraformRunner>,
    /// Connects to the provisioned cluster
    pub kube: Arc<dyn KubeConnector>,
    /// Local git
    pub git: Arc<dyn GitOps>,
    /// Git SaaS API
    pub git_api: Arc<dyn GitProviderApi>,
    /// ArgoCD API
    pub argocd: Arc<dyn ArgoCdApi>,
    /// Vault API
    pub vault: Arc<dyn VaultApi>,
    /// Template renderer
    pub detokenizer: Arc<dyn Detokenizer>,
    /// State-store bucket creation
    pub state_store: Arc<dyn StateStoreProvisioner>,
    /// DNS liveness
    pub probe: Arc<dyn HealthProbe>,
}

/// Everything a step may read; steps never mutate it
///
/// Use [`PipelineContext::builder`] to construct instances:
///
/// ```ignore
/// let ctx = PipelineContext::builder("demo", adapter, layout, store)
///     .timeouts(definition.timeouts.clone())
///     .build()?;
/// ```
#[derive(Clone)]
pub struct PipelineContext {
    /// Key of the record in the store
    pub cluster_name: String,
    /// Cloud adapter chosen at dispatch
    pub adapter: Arc<dyn ProviderAdapter>,
    /// Local working tree
    pub layout: Layout,
    /// Wait budgets
    pub timeouts: Timeouts,
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// External collaborators
    pub services: Services,
}

impl PipelineContext {
    /// Create a builder with real collaborators by default
    pub fn builder(
        cluster_name: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
        layout: Layout,
        store: Arc<dyn CheckpointStore>,
    ) -> PipelineContextBuilder {
        PipelineContextBuilder {
            cluster_name: cluster_name.into(),
            adapter,
            layout,
            store,
            timeouts: Timeouts::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            terraform: None,
            kube: None,
            git: None,
            git_api: None,
            argocd: None,
            vault: None,
            detokenizer: None,
            state_store: None,
            probe: None,
        }
    }

    /// Current record from the store
    pub async fn reload(&self) -> Result<ClusterRecord> {
        self.services.store.get_cluster(&self.cluster_name).await
    }

    /// Retry policy for every Terraform module, with the configured wait
    pub fn terraform_policy(&self) -> RetryConfig {
        let delay = self.timeouts.terraform_retry();
        RetryConfig {
            initial_delay: delay,
            max_delay: delay,
            ..RetryConfig::terraform()
        }
    }

    /// Directory of a Terraform root module
    pub fn terraform_dir(&self, module: TerraformModule) -> PathBuf {
        self.layout.terraform_dir(
            module.dir_name(self.adapter.cloud(), self.adapter.git()),
        )
    }

    /// Kubeconfig of the provisioned cluster
    pub fn kubeconfig(&self, record: &ClusterRecord) -> PathBuf {
        if record.kubeconfig_path.is_empty() {
            self.adapter.kubeconfig_path(&self.layout, record)
        } else {
            PathBuf::from(&record.kubeconfig_path)
        }
    }

    /// Connect to the provisioned cluster
    pub async fn connect(&self, record: &ClusterRecord) -> Result<Arc<dyn KubeOps>> {
        let kubeconfig = self.kubeconfig(record);
        self.services.kube.connect(Path::new(&kubeconfig)).await
    }
}

/// Builder for [`PipelineContext`]
pub struct PipelineContextBuilder {
    cluster_name: String,
    adapter: Arc<dyn ProviderAdapter>,
    layout: Layout,
    store: Arc<dyn CheckpointStore>,
    timeouts: Timeouts,
    poll_interval: Duration,
    terraform: Option<Arc<dyn TerraformRunner>>,
    kube: Option<Arc<dyn KubeConnector>>,
    git: Option<Arc<dyn GitOps>>,
    git_api: Option<Arc<dyn GitProviderApi>>,
    argocd: Option<Arc<dyn ArgoCdApi>>,
    vault: Option<Arc<dyn VaultApi>>,
    detokenizer: Option<Arc<dyn Detokenizer>>,
    state_store: Option<Arc<dyn StateStoreProvisioner>>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl PipelineContextBuilder {
    /// Set wait budgets
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the readiness poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the Terraform runner
    pub fn terraform(mut self, terraform: Arc<dyn TerraformRunner>) -> Self {
        self.terraform = Some(terraform);
        self
    }

    /// Override the cluster connector
    pub fn kube_connector(mut self, kube: Arc<dyn KubeConnector>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override local git
    pub fn git(mut self, git: Arc<dyn GitOps>) -> Self {
        self.git = Some(git);
        self
    }

    /// Override the git SaaS API
    pub fn git_api(mut self, git_api: Arc<dyn GitProviderApi>) -> Self {
        self.git_api = Some(git_api);
        self
    }

    /// Override the ArgoCD API
    pub fn argocd(mut self, argocd: Arc<dyn ArgoCdApi>) -> Self {
        self.argocd = Some(argocd);
        self
    }

    /// Override the Vault API
    pub fn vault(mut self, vault: Arc<dyn VaultApi>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Override the detokenizer
    pub fn detokenizer(mut self, detokenizer: Arc<dyn Detokenizer>) -> Self {
        self.detokenizer = Some(detokenizer);
        self
    }

    /// Override the state-store provisioner
    pub fn state_store(mut self, state_store: Arc<dyn StateStoreProvisioner>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Override the liveness probe
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the context, creating HTTP clients that were not overridden
    pub fn build(self) -> Result<PipelineContext> {
        let git_api = match self.git_api {
            Some(api) => api,
            None => create_git_provider_api(self.adapter.git())?,
        };
        let argocd: Arc<dyn ArgoCdApi> = match self.argocd {
            Some(api) => api,
            None => Arc::new(ArgoCdClient::new()?),
        };
        let vault: Arc<dyn VaultApi> = match self.vault {
            Some(api) => api,
            None => Arc::new(VaultClient::new()?),
        };

        Ok(PipelineContext {
            cluster_name: self.cluster_name,
            adapter: self.adapter,
            layout: self.layout,
            timeouts: self.timeouts,
            poll_interval: self.poll_interval,
            services: Services {
                store: self.store,
                terraform: self
                    .terraform
                    .unwrap_or_else(|| Arc::new(TerraformCli::default())),
                kube: self.kube.unwrap_or_else(|| Arc::new(KubeClientConnector)),
                git: self.git.unwrap_or_else(|| Arc::new(Git2Ops)),
                git_api,
                argocd,
                vault,
                detokenizer: self
                    .detokenizer
                    .unwrap_or_else(|| Arc::new(LiteralDetokenizer)),
                state_store: self
                    .state_store
                    .unwrap_or_else(|| Arc::new(CliStateStore)),
                probe: self.probe.unwrap_or_else(|| Arc::new(DnsProbe)),
            },
        })
    }
}
