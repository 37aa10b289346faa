//! Amazon Web Services (EKS)

use async_trait::async_trait;
use tracing::debug;

use super::{missing_credentials, ProviderAdapter};
use crate::cluster::{CloudProvider, ClusterRecord, GitProvider};
use crate::config::Layout;
use crate::k8s::KubeOps;
use crate::state_store::StateStoreBackend;
use crate::terraform::{EnvMap, TerraformModule};
use crate::Result;

/// EKS with an S3 state store
#[derive(Clone, Debug)]
pub struct AwsAdapter {
    git: GitProvider,
}

impl AwsAdapter {
    /// Adapter wired to `git`
    pub fn new(git: GitProvider) -> Self {
        Self { git }
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn git(&self) -> GitProvider {
        self.git
    }

    fn validate_credentials(&self, record: &ClusterRecord) -> Result<()> {
        match &record.cloud.aws {
            Some(aws) if !aws.access_key_id.is_empty() && !aws.secret_access_key.is_empty() => {
                Ok(())
            }
            _ => Err(missing_credentials(
                self.cloud(),
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            )),
        }
    }

    fn cloud_env(
        &self,
        _module: TerraformModule,
        record: &ClusterRecord,
        _layout: &Layout,
    ) -> Result<EnvMap> {
        let aws = record.cloud.aws.clone().unwrap_or_default();
        let mut env = EnvMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), aws.access_key_id),
            ("AWS_SECRET_ACCESS_KEY".to_string(), aws.secret_access_key),
            ("AWS_REGION".to_string(), record.cloud_region.clone()),
            ("TF_VAR_aws_region".to_string(), record.cloud_region.clone()),
        ]);
        if !aws.session_token.is_empty() {
            env.insert("AWS_SESSION_TOKEN".into(), aws.session_token);
        }
        Ok(env)
    }

    fn cloud_required_env(&self, _module: TerraformModule) -> Vec<&'static str> {
        vec![
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_REGION",
            "TF_VAR_aws_region",
        ]
    }

    fn state_store_backend(&self, record: &ClusterRecord) -> StateStoreBackend {
        StateStoreBackend::S3Compatible {
            endpoint: None,
            region: record.cloud_region.clone(),
        }
    }

    async fn bootstrap(&self, _kube: &dyn KubeOps, record: &ClusterRecord) -> Result<()> {
        // external-dns and the registry authenticate through IRSA roles created by terraform
        debug!(cluster = %record.cluster_name, "No aws-specific bootstrap secrets");
        Ok(())
    }
}
