//! Local k3d cluster

use async_trait::async_trait;

use super::{docker_config, state_store_aws_env, upsert_docker_config, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// k3d on the operator's machine; needs no cloud credentials
#[derive(Clone, Debug)]
pub struct K3dAdapter {
    git: GitProvider,
}

impl K3dAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }

    fn registry_host(&self) -> &'static str {
        match self.git {
            GitProvider::Github => "ghcr.io",
            GitProvider::Gitlab => "registry.gitlab.com",
        }
    }
}

#[async_trait]
impl ProviderAdapter for K3dAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::K3d
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, _record: &ClusterRecord) -> Result<()> {
        Ok(())
    }

    fn cloud_env(
        &self,
        module: TerraformModule,
        record: &ClusterRecord,
        layout: &Layout,
    ) -> Result<EnvMap> {
        let mut env = EnvMap::new();
        // MinIO keys, once the in-cluster backend exists
        if record.state_store_credentials.is_set() {
            state_store_aws_env(record, &mut env);
        }
        if module != TerraformModule::Git {
            env.insert(
                "TF_VAR_kube_config_path".into(),
                self.kubeconfig_path(layout, record)
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        Ok(env)
    }

    fn cloud_required_env(&self, module: TerraformModule) -> Vec<&'static str> {
        match module {
            TerraformModule::Git => vec![],
            _ => vec!["TF_VAR_kube_config_path"],
        }
    }

    fn state_store_backend(&self, _record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::Local
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        let config = docker_config(
            self.registry_host(),
            &record.git_auth.owner,
            &record.git_auth.token,
        );
        upsert_docker_config(kube, config).await
    }
}
