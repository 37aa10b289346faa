//! Cloud provider adapters
//!
//! Each supported cloud implements [`ProviderAdapter`]. The adapter is picked
//! once by [`create_adapter`] and injected into the pipeline, so steps never
//! switch on the cloud themselves. The git provider is orthogonal: its keys
//! come from [`GitProvider`] and are merged into every environment by the
//! trait's provided methods.
//!
//! # Supported Providers
//!
//! - [`AwsAdapter`] - EKS, S3 state store
//! - [`AzureAdapter`] - AKS, blob container state store
//! - [`GoogleAdapter`] - GKE, GCS state store
//! - [`CivoAdapter`] - Civo k3s, Civo object store
//! - [`DigitalOceanAdapter`] - DOKS, Spaces
//! - [`VultrAdapter`] - VKE, Vultr object storage
//! - [`K3dAdapter`] - local k3d cluster, local state

mod aws;
mod azure;
mod civo;
mod digitalocean;
mod google;
mod k3d;
mod vultr;

pub use aws::AwsAdapter;
pub use azure::AzureAdapter;
pub use civo::CivoAdapter;
pub use digitalocean::DigitalOceanAdapter;
pub use google::GoogleAdapter;
pub use k3d::K3dAdapter;
pub use vultr::VultrAdapter;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::cluster::{CloudProvider, ClusterRecord, GitProvider};
use crate::config::Layout;
use crate::k8s::{KubeOps, PortForwardTarget};
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::{Error, Result};

/// Namespace and name of the external-dns credentials secret
pub const EXTERNAL_DNS_SECRET: (&str, &str) = ("external-dns", "external-dns-secrets");

/// Namespace and name of the workflow registry credentials secret
pub const DOCKER_CONFIG_SECRET: (&str, &str) = ("argo", "docker-config");

/// Cloud-specific behaviour of the pipeline
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Cloud this adapter serves
    fn cloud(&self) -> CloudProvider;

    /// Git provider the cluster is wired to
    fn git(&self) -> GitProvider;

    /// Fail if the record lacks the credentials this cloud needs
    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()>;

    /// Cloud keys for a module, without the cross-cutting keys and unvalidated
    fn cloud_env(
        &self,
        module: TerraformModule,
        record: &ClusterRecord,
        layout: &Layout,
    ) -> Result<EnvMap>;

    /// Cloud keys that must be non-empty for a module
    fn cloud_required_env(&self, module: TerraformModule) -> Vec<&'static str>;

    /// Where the state store lives
    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend;

    /// Cloud-specific secrets created right after the cluster exists
    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()>;

    /// Kubeconfig written by the cloud module
    fn kubeconfig_path(&self, layout: &Layout, _record: &ClusterRecord) -> PathBuf {
        layout.kubeconfig()
    }

    /// Every key a module consumes that must be non-empty
    fn required_env(&self, module: TerraformModule) -> Vec<&'static str> {
        let mut keys = base_required_env(self.cloud(), self.git(), module);
        keys.extend(self.cloud_required_env(module));
        keys
    }

    /// Full, validated environment for a Terraform module
    fn terraform_env(
        &self,
        module: TerraformModule,
        record: &ClusterRecord,
        layout: &Layout,
    ) -> Result<EnvMap> {
        let mut env = base_env(self.git(), module, record);
        env.extend(self.cloud_env(module, record, layout)?);
        validate_env(&env, &self.required_env(module), module)?;
        Ok(env)
    }

    /// Environment for `terraform destroy`; identical to apply
    fn destroy_env(
        &self,
        module: TerraformModule,
        record: &ClusterRecord,
        layout: &Layout,
    ) -> Result<EnvMap> {
        self.terraform_env(module, record, layout)
    }
}

/// Pick the adapter for a cloud/git pair and check its credentials
pub fn create_adapter(
    cloud: &str,
    git: &str,
    record: &ClusterRecord,
) -> Result<Arc<dyn ProviderAdapter>> {
    let cloud: CloudProvider = cloud.parse()?;
    let git: GitProvider = git.parse()?;

    let adapter: Arc<dyn ProviderAdapter> = match cloud {
        CloudProvider::Aws => Arc::new(AwsAdapter::new(git)),
        CloudProvider::Azure => Arc::new(AzureAdapter::new(git)),
        CloudProvider::Google => Arc::new(GoogleAdapter::new(git)),
        CloudProvider::Civo => Arc::new(CivoAdapter::new(git)),
        CloudProvider::DigitalOcean => Arc::new(DigitalOceanAdapter::new(git)),
        CloudProvider::Vultr => Arc::new(VultrAdapter::new(git)),
        CloudProvider::K3d => Arc::new(K3dAdapter::new(git)),
    };
    adapter.validate_credentials(record)?;
    Ok(adapter)
}

/// Keys shared by every cloud
fn base_env(git: GitProvider, module: TerraformModule, record: &ClusterRecord) -> EnvMap {
    let mut env = EnvMap::new();
    env.insert(git.token_env().into(), record.git_auth.token.clone());
    env.insert(git.owner_env().into(), record.git_auth.owner.clone());
    env.insert(
        "TF_VAR_atlantis_repo_webhook_secret".into(),
        record.webhook_secret.clone(),
    );
    env.insert(
        "TF_VAR_atlantis_repo_webhook_url".into(),
        atlantis_webhook_url(record),
    );
    env.insert(
        "TF_VAR_kbot_ssh_public_key".into(),
        record.git_auth.public_key.clone(),
    );
    env.insert(
        "TF_VAR_kbot_ssh_private_key".into(),
        record.git_auth.private_key.clone(),
    );

    match module {
        TerraformModule::Git => {
            env.insert(git_owner_var(git).into(), record.git_auth.owner.clone());
        }
        TerraformModule::Cloud => {
            env.insert("TF_VAR_cluster_name".into(), record.cluster_name.clone());
            env.insert("TF_VAR_cluster_region".into(), record.cloud_region.clone());
            if let Some(node_type) = &record.node_type {
                env.insert("TF_VAR_node_type".into(), node_type.clone());
            }
            if let Some(count) = record.node_count {
                env.insert("TF_VAR_node_count".into(), count.to_string());
            }
        }
        TerraformModule::Vault | TerraformModule::Users => {
            let addr = PortForwardTarget::vault().local_url();
            env.insert("VAULT_ADDR".into(), addr.clone());
            env.insert("VAULT_TOKEN".into(), record.vault_auth.root_token.clone());
            env.insert("TF_VAR_vault_addr".into(), addr);
            env.insert(
                "TF_VAR_vault_token".into(),
                record.vault_auth.root_token.clone(),
            );
        }
    }
    env
}

fn base_required_env(
    cloud: CloudProvider,
    git: GitProvider,
    module: TerraformModule,
) -> Vec<&'static str> {
    let mut keys = vec![
        git.token_env(),
        git.owner_env(),
        "TF_VAR_atlantis_repo_webhook_secret",
        "TF_VAR_atlantis_repo_webhook_url",
        "TF_VAR_kbot_ssh_public_key",
        "TF_VAR_kbot_ssh_private_key",
    ];
    match module {
        TerraformModule::Git => keys.push(git_owner_var(git)),
        TerraformModule::Cloud => {
            keys.push("TF_VAR_cluster_name");
            if !cloud.is_local() {
                keys.push("TF_VAR_cluster_region");
            }
        }
        TerraformModule::Vault | TerraformModule::Users => keys.extend([
            "VAULT_ADDR",
            "VAULT_TOKEN",
            "TF_VAR_vault_addr",
            "TF_VAR_vault_token",
        ]),
    }
    keys
}

fn git_owner_var(git: GitProvider) -> &'static str {
    match git {
        GitProvider::Github => "TF_VAR_github_owner",
        GitProvider::Gitlab => "TF_VAR_gitlab_owner",
    }
}

/// `https://atlantis.<domain>/events`
pub fn atlantis_webhook_url(record: &ClusterRecord) -> String {
    format!("{}/events", record.ingress_url("atlantis"))
}

/// Reject an environment with a missing or empty required key
pub fn validate_env(env: &EnvMap, required: &[&str], module: TerraformModule) -> Result<()> {
    for key in required {
        match env.get(*key) {
            Some(value) if !value.is_empty() => {}
            _ => {
                return Err(Error::configuration(format!(
                    "{key} is required by the {module} terraform module but is empty"
                )))
            }
        }
    }
    Ok(())
}

/// S3 backend keys taken from the state-store credentials
fn state_store_aws_env(record: &ClusterRecord, env: &mut EnvMap) {
    let creds = &record.state_store_credentials;
    env.insert("AWS_ACCESS_KEY_ID".into(), creds.access_key_id.clone());
    env.insert(
        "AWS_SECRET_ACCESS_KEY".into(),
        creds.secret_access_key.clone(),
    );
    if !creds.session_token.is_empty() {
        env.insert("AWS_SESSION_TOKEN".into(), creds.session_token.clone());
    }
}

fn missing_credentials(cloud: CloudProvider, what: &str) -> Error {
    Error::configuration(format!("{cloud} requires {what}"))
}

/// `~/.docker/config.json` body authenticating to one registry
pub fn docker_config(registry: &str, username: &str, password: &str) -> String {
    let auth = STANDARD.encode(format!("{username}:{password}"));
    serde_json::json!({ "auths": { registry: { "auth": auth } } }).to_string()
}

async fn upsert_external_dns_secret(
    kube: &dyn KubeOps,
    data: BTreeMap<String, String>,
) -> Result<()> {
    let (namespace, name) = EXTERNAL_DNS_SECRET;
    kube.upsert_secret(namespace, name, data, BTreeMap::new())
        .await
}

async fn upsert_docker_config(kube: &dyn KubeOps, config_json: String) -> Result<()> {
    let (namespace, name) = DOCKER_CONFIG_SECRET;
    kube.upsert_secret(
        namespace,
        name,
        BTreeMap::from([("config.json".to_string(), config_json)]),
        BTreeMap::new(),
    )
    .await
}
