//! Microsoft Azure (AKS)

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{missing_credentials, upsert_external_dns_secret, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, DnsProvider, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// AKS with a blob-container state store
#[derive(Clone, Debug)]
pub struct AzureAdapter {
    git: GitProvider,
}

impl AzureAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }

    /// Storage accounts are 3-24 lowercase alphanumerics, globally unique
    fn storage_account(record: &ClusterRecord) -> String {
        let mut name: String = format!("k1state{}", record.cluster_id)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        name.truncate(24);
        name
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        match &record.cloud.azure {
            Some(az)
                if !az.client_id.is_empty()
                    && !az.client_secret.is_empty()
                    && !az.tenant_id.is_empty()
                    && !az.subscription_id.is_empty() =>
            {
                Ok(())
            }
            _ => Err(missing_credentials(self.cloud(), "the ARM_* service principal")),
        }
    }

    fn cloud_env(
        &self,
        _module: TerraformModule,
        record: &ClusterRecord,
        _layout: &Layout,
    ) -> Result<EnvMap> {
        let az = record.cloud.azure.clone().unwrap_or_default();
        Ok(EnvMap::from([
            ("ARM_CLIENT_ID".to_string(), az.client_id),
            ("ARM_CLIENT_SECRET".to_string(), az.client_secret),
            ("ARM_TENANT_ID".to_string(), az.tenant_id),
            ("ARM_SUBSCRIPTION_ID".to_string(), az.subscription_id),
            (
                "ARM_ACCESS_KEY".to_string(),
                record.state_store_credentials.secret_access_key.clone(),
            ),
            ("TF_VAR_location".to_string(), record.cloud_region.clone()),
        ]))
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec![
            "ARM_CLIENT_ID",
            "ARM_CLIENT_SECRET",
            "ARM_TENANT_ID",
            "ARM_SUBSCRIPTION_ID",
            "ARM_ACCESS_KEY",
            "TF_VAR_location",
        ]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::AzureBlob {
            account: Self::storage_account(record),
            resource_group: format!("{}-state", record.cluster_name),
            location: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        if record.dns_provider != DnsProvider::Cloud {
            return Ok(());
        }
        let az = record.cloud.azure.clone().unwrap_or_default();
        let azure_json = serde_json::json!({
            "tenantId": az.tenant_id,
            "subscriptionId": az.subscription_id,
            "aadClientId": az.client_id,
            "aadClientSecret": az.client_secret,
            "resourceGroup": record.cluster_name,
        });
        upsert_external_dns_secret(
            kube,
            BTreeMap::from([("azure.json".to_string(), azure_json.to_string())]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fixtures::record;
    use crate::k8s::MockKubeOps;

    #[test]
    fn storage_account_name_is_valid() {
        let mut rec = record(CloudProvider::Azure, GitProvider::Github);
        rec.cluster_id = "AB-12cd".into();
        let name = AzureAdapter::storage_account(&rec);
        assert_eq!(name, "k1stateab12cd");
        assert!(name.len() <= 24);
    }

    #[tokio::test]
    async fn external_dns_secret_carries_service_principal() {
        let rec = record(CloudProvider::Azure, GitProvider::Gitlab);
        let mut kube = MockKubeOps::new();
        kube.expect_upsert_secret()
            .withf(|ns, name, data, _| {
                ns == "external-dns"
                    && name == "external-dns-secrets"
                    && data["azure.json"].contains("\"aadClientId\":\"client\"")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        AzureAdapter::new(GitProvider::Gitlab)
            .bootstrap(&kube, &rec)
            .await
            .unwrap();
    }
}
