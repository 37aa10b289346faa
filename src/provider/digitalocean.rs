//! DigitalOcean (DOKS)

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{
    docker_config, missing_credentials, upsert_docker_config, upsert_external_dns_secret,
    ProviderAdapter,
};
use crate::cluster::{CloudProvider, ClusterRecord, DigitalOceanAuth, DnsProvider, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

const REGISTRY_HOST: &str = "registry.digitalocean.com";

/// DOKS with Spaces as an S3 backend
#[derive(Clone, Debug)]
pub struct DigitalOceanAdapter {
    git: GitProvider,
}

impl DigitalOceanAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }

    fn auth(record: &ClusterRecord) -> DigitalOceanAuth {
        record.cloud.digitalocean.clone().unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for DigitalOceanAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::DigitalOcean
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        let auth = Self::auth(record);
        if auth.token.is_empty() || auth.spaces_key.is_empty() || auth.spaces_secret.is_empty() {
            return Err(missing_credentials(
                self.cloud(),
                "DO_TOKEN, SPACES_ACCESS_KEY_ID and SPACES_SECRET_ACCESS_KEY",
            ));
        }
        Ok(())
    }

    fn cloud_env(
        &self,
        _module: TerraformModule,
        record: &ClusterRecord,
        _layout: &Layout,
    ) -> Result<EnvMap> {
        let auth = Self::auth(record);
        Ok(EnvMap::from([
            ("DO_TOKEN".to_string(), auth.token.clone()),
            ("DIGITALOCEAN_TOKEN".to_string(), auth.token),
            ("SPACES_ACCESS_KEY_ID".to_string(), auth.spaces_key.clone()),
            (
                "SPACES_SECRET_ACCESS_KEY".to_string(),
                auth.spaces_secret.clone(),
            ),
            // Spaces is the S3 backend
            ("AWS_ACCESS_KEY_ID".to_string(), auth.spaces_key),
            ("AWS_SECRET_ACCESS_KEY".to_string(), auth.spaces_secret),
        ]))
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec![
            "DO_TOKEN",
            "DIGITALOCEAN_TOKEN",
            "SPACES_ACCESS_KEY_ID",
            "SPACES_SECRET_ACCESS_KEY",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
        ]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::S3Compatible {
            endpoint: Some(format!(
                "https://{}.digitaloceanspaces.com",
                record.cloud_region
            )),
            region: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        let token = Self::auth(record).token;
        if record.dns_provider == DnsProvider::Cloud {
            upsert_external_dns_secret(
                kube,
                BTreeMap::from([("do-token".to_string(), token.clone())]),
            )
            .await?;
        }
        upsert_docker_config(kube, docker_config(REGISTRY_HOST, &token, &token)).await
    }
}
