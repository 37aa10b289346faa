//! Google Cloud (GKE)

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{missing_credentials, upsert_external_dns_secret, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, DnsProvider, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// GKE with a GCS state store
#[derive(Clone, Debug)]
pub struct GoogleAdapter {
    git: GitProvider,
}

impl GoogleAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Google
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        match &record.cloud.google {
            Some(g) if !g.project_id.is_empty() && !g.key_json.is_empty() => Ok(()),
            _ => Err(missing_credentials(
                self.cloud(),
                "GOOGLE_PROJECT and a readable GOOGLE_APPLICATION_CREDENTIALS key file",
            )),
        }
    }

    fn cloud_env(
        &self,
        _module: TerraformModule,
        record: &ClusterRecord,
        _layout: &Layout,
    ) -> Result<EnvMap> {
        let g = record.cloud.google.clone().unwrap_or_default();
        let mut env = EnvMap::from([
            ("GOOGLE_CREDENTIALS".to_string(), g.key_json),
            ("TF_VAR_project".to_string(), g.project_id),
            ("TF_VAR_gcp_region".to_string(), record.cloud_region.clone()),
        ]);
        if !g.key_file.is_empty() {
            // gcloud reads the file rather than the JSON
            env.insert("CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE".into(), g.key_file);
        }
        Ok(env)
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec!["GOOGLE_CREDENTIALS", "TF_VAR_project", "TF_VAR_gcp_region"]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::Gcs {
            project: record
                .cloud
                .google
                .as_ref()
                .map(|g| g.project_id.clone())
                .unwrap_or_default(),
            location: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        if record.dns_provider != DnsProvider::Cloud {
            return Ok(());
        }
        let key_json = record
            .cloud
            .google
            .as_ref()
            .map(|g| g.key_json.clone())
            .unwrap_or_default();
        upsert_external_dns_secret(
            kube,
            BTreeMap::from([("credentials.json".to_string(), key_json)]),
        )
        .await
    }
}
