//! Vultr (VKE)

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{missing_credentials, state_store_aws_env, upsert_external_dns_secret, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, DnsProvider, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// VKE with Vultr object storage as an S3 backend
#[derive(Clone, Debug)]
pub struct VultrAdapter {
    git: GitProvider,
}

impl VultrAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }

    fn api_key(record: &ClusterRecord) -> String {
        record
            .cloud
            .vultr
            .as_ref()
            .map(|v| v.token.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for VultrAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Vultr
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        if Self::api_key(record).is_empty() {
            return Err(missing_credentials(self.cloud(), "VULTR_API_KEY"));
        }
        if !record.state_store_credentials.is_set() {
            return Err(missing_credentials(
                self.cloud(),
                "STATE_STORE_ACCESS_KEY_ID and STATE_STORE_SECRET_ACCESS_KEY for object storage",
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
        let key = Self::api_key(record);
        let mut env = EnvMap::from([
            ("VULTR_API_KEY".to_string(), key.clone()),
            ("TF_VAR_vultr_api_key".to_string(), key),
        ]);
        state_store_aws_env(record, &mut env);
        Ok(env)
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec![
            "VULTR_API_KEY",
            "TF_VAR_vultr_api_key",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
        ]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::S3Compatible {
            endpoint: Some(format!("https://{}.vultrobjects.com", record.cloud_region)),
            region: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        if record.dns_provider != DnsProvider::Cloud {
            return Ok(());
        }
        upsert_external_dns_secret(
            kube,
            BTreeMap::from([("vultr-api-key".to_string(), Self::api_key(record))]),
        )
        .await
    }
}
