//! Civo (k3s)

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{missing_credentials, state_store_aws_env, upsert_external_dns_secret, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, DnsProvider, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// Civo k3s with the Civo object store as an S3 backend
#[derive(Clone, Debug)]
pub struct CivoAdapter {
    git: GitProvider,
}

impl CivoAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }

    fn token(record: &ClusterRecord) -> String {
        record
            .cloud
            .civo
            .as_ref()
            .map(|c| c.token.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for CivoAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Civo
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        if Self::token(record).is_empty() {
            return Err(missing_credentials(self.cloud(), "CIVO_TOKEN"));
        }
        if !record.state_store_credentials.is_set() {
            return Err(missing_credentials(
                self.cloud(),
                "STATE_STORE_ACCESS_KEY_ID and STATE_STORE_SECRET_ACCESS_KEY for the object store",
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
        let token = Self::token(record);
        let mut env = EnvMap::from([
            ("CIVO_TOKEN".to_string(), token.clone()),
            ("TF_VAR_civo_token".to_string(), token),
        ]);
        state_store_aws_env(record, &mut env);
        Ok(env)
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec![
            "CIVO_TOKEN",
            "TF_VAR_civo_token",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
        ]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::S3Compatible {
            endpoint: Some(format!("https://objectstore.{}.civo.com", record.cloud_region)),
            region: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        if record.dns_provider != DnsProvider::Cloud {
            return Ok(());
        }
        upsert_external_dns_secret(
            kube,
            BTreeMap::from([("civo-token".to_string(), Self::token(record))]),
        )
        .await
    }
}
