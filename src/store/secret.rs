//! Kubernetes Secret-backed store
//!
//! Each record is serialized into the `cluster.json` key of the Secret
//! `kubefirst-cluster-<name>`. The bootstrap cluster holding the Secrets is
//! independent from the cluster being provisioned.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

use super::CheckpointStore;
use crate::cluster::{ClusterPatch, ClusterRecord};
use crate::{Error, Result, FIELD_MANAGER};

const RECORD_KEY: &str = "cluster.json";
const RECORD_LABEL: &str = "kubefirst.io/cluster-record";
const SECRET_PREFIX: &str = "kubefirst-cluster-";

/// Records stored as Secrets in one namespace
#[derive(Clone)]
pub struct SecretStore {
    secrets: Api<Secret>,
}

impl SecretStore {
    /// Store in `namespace` of the cluster reached by `client`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            secrets: Api::namespaced(client, namespace),
        }
    }

    fn secret_name(name: &str) -> String {
        format!("{SECRET_PREFIX}{name}")
    }

    fn to_secret(record: &ClusterRecord) -> Result<Secret> {
        let body = serde_json::to_vec(record)?;
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(Self::secret_name(&record.cluster_name)),
                labels: Some(BTreeMap::from([(
                    RECORD_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                RECORD_KEY.to_string(),
                ByteString(body),
            )])),
            ..Default::default()
        })
    }

    fn from_secret(name: &str, secret: &Secret) -> Result<ClusterRecord> {
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(RECORD_KEY))
            .ok_or_else(|| {
                Error::serialization(format!("secret for cluster {name} has no {RECORD_KEY}"))
            })?;
        serde_json::from_slice(&data.0).map_err(|e| {
            Error::serialization(format!("cannot decode record for cluster {name}: {e}"))
        })
    }
}

#[async_trait]
impl CheckpointStore for SecretStore {
    async fn get_cluster(&self, name: &str) -> Result<ClusterRecord> {
        match self.secrets.get(&Self::secret_name(name)).await {
            Ok(secret) => Self::from_secret(name, &secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::NotFound(name.to_string())),
            Err(e) => Err(Error::store(format!("failed to read cluster {name}: {e}"))),
        }
    }

    async fn insert_cluster(&self, record: &ClusterRecord) -> Result<()> {
        let secret = Self::to_secret(record)?;
        match self.secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::store(format!(
                "cluster {} already exists",
                record.cluster_name
            ))),
            Err(e) => Err(Error::store(format!(
                "failed to insert cluster {}: {e}",
                record.cluster_name
            ))),
        }
    }

    async fn update_cluster(&self, name: &str, patch: ClusterPatch) -> Result<ClusterRecord> {
        let mut record = self.get_cluster(name).await?;
        record.apply(&patch)?;

        let secret = Self::to_secret(&record)?;
        self.secrets
            .patch(
                &Self::secret_name(name),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| Error::store(format!("failed to update cluster {name}: {e}")))?;
        Ok(record)
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        match self
            .secrets
            .delete(&Self::secret_name(name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::store(format!("failed to delete cluster {name}: {e}"))),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let list = self
            .secrets
            .list(&ListParams::default().labels(&format!("{RECORD_LABEL}=true")))
            .await
            .map_err(|e| Error::store(format!("failed to list clusters: {e}")))?;

        let mut names: Vec<String> = list
            .items
            .iter()
            .filter_map(|s| s.metadata.name.as_deref())
            .filter_map(|n| n.strip_prefix(SECRET_PREFIX))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}
