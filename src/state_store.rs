//! Terraform state-store bucket provisioning
//!
//! Buckets are created with the cloud's own CLI so no cloud SDK is linked.
//! Creation tolerates a bucket that already exists and belongs to the caller,
//! which makes the step safe to re-run after a crash.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::cluster::{ClusterRecord, StateStoreCredentials, StateStoreDetails};
use crate::command::{run_captured, run_streaming};
use crate::terraform::EnvMap;
use crate::{Error, Result};

/// Where Terraform keeps remote state for a cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateStoreBackend {
    /// S3 or an S3-compatible object store
    S3Compatible {
        /// Custom endpoint; `None` means AWS S3
        endpoint: Option<String>,
        /// Bucket region
        region: String,
    },
    /// Azure blob container inside a storage account
    AzureBlob {
        /// Storage account name
        account: String,
        /// Resource group holding the account
        resource_group: String,
        /// Azure location
        location: String,
    },
    /// Google Cloud Storage
    Gcs {
        /// Project owning the bucket
        project: String,
        /// Bucket location
        location: String,
    },
    /// State stays in the working tree
    Local,
}

/// Result of creating the state store
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateStoreOutput {
    /// Bucket identity
    pub details: StateStoreDetails,
    /// Credentials issued during creation, if any
    pub credentials: Option<StateStoreCredentials>,
}

/// `k1-state-store-<cluster>-<id>`
pub fn bucket_name(record: &ClusterRecord) -> String {
    format!(
        "k1-state-store-{}-{}",
        record.cluster_name, record.cluster_id
    )
}

/// Creates the state-store bucket
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateStoreProvisioner: Send + Sync {
    /// Create `bucket` on `backend` using credentials from `env`
    async fn create(
        &self,
        backend: &StateStoreBackend,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput>;
}

/// Provisioner that shells out to `aws`, `az` and `gcloud`
#[derive(Clone, Debug, Default)]
pub struct CliStateStore;

impl CliStateStore {
    async fn create_s3(
        &self,
        endpoint: Option<&str>,
        region: &str,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput> {
        let constraint = format!("LocationConstraint={region}");
        let mut args = vec!["s3api", "create-bucket", "--bucket", bucket, "--region", region];
        if let Some(endpoint) = endpoint {
            args.extend(["--endpoint-url", endpoint]);
        }
        if endpoint.is_none() && region != "us-east-1" {
            args.extend(["--create-bucket-configuration", constraint.as_str()]);
        }

        tolerate_existing(run_streaming("aws", &args, None, env).await)?;

        let hostname = match endpoint {
            Some(url) => url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => format!("s3.{region}.amazonaws.com"),
        };
        Ok(StateStoreOutput {
            details: StateStoreDetails {
                name: bucket.to_string(),
                id: bucket.to_string(),
                hostname,
            },
            credentials: None,
        })
    }

    async fn create_azure(
        &self,
        account: &str,
        resource_group: &str,
        location: &str,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput> {
        run_streaming(
            "az",
            &["group", "create", "--name", resource_group, "--location", location],
            None,
            env,
        )
        .await?;
        tolerate_existing(
            run_streaming(
                "az",
                &[
                    "storage", "account", "create", "--name", account, "--resource-group",
                    resource_group, "--location", location, "--sku", "Standard_LRS",
                ],
                None,
                env,
            )
            .await,
        )?;
        let key = run_captured(
            "az",
            &[
                "storage", "account", "keys", "list", "--account-name", account,
                "--resource-group", resource_group, "--query", "[0].value", "-o", "tsv",
            ],
            None,
            env,
        )
        .await?
        .trim()
        .to_string();
        if key.is_empty() {
            return Err(Error::command(
                "az storage account keys list",
                format!("no key returned for storage account {account}"),
            ));
        }
        let mut keyed = env.clone();
        keyed.insert("AZURE_STORAGE_KEY".to_string(), key.clone());
        tolerate_existing(
            run_streaming(
                "az",
                &[
                    "storage", "container", "create", "--name", bucket, "--account-name",
                    account,
                ],
                None,
                &keyed,
            )
            .await,
        )?;

        Ok(StateStoreOutput {
            details: StateStoreDetails {
                name: bucket.to_string(),
                id: account.to_string(),
                hostname: format!("{account}.blob.core.windows.net"),
            },
            credentials: Some(StateStoreCredentials {
                access_key_id: account.to_string(),
                secret_access_key: key,
                session_token: String::new(),
            }),
        })
    }

    async fn create_gcs(
        &self,
        project: &str,
        location: &str,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput> {
        let url = format!("gs://{bucket}");
        tolerate_existing(
            run_streaming(
                "gcloud",
                &[
                    "storage", "buckets", "create", url.as_str(), "--project", project, "--location",
                    location,
                ],
                None,
                env,
            )
            .await,
        )?;
        Ok(StateStoreOutput {
            details: StateStoreDetails {
                name: bucket.to_string(),
                id: url,
                hostname: "storage.googleapis.com".to_string(),
            },
            credentials: None,
        })
    }
}

#[async_trait]
impl StateStoreProvisioner for CliStateStore {
    async fn create(
        &self,
        backend: &StateStoreBackend,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput> {
        info!(bucket = %bucket, backend = ?backend, "Creating state store");
        match backend {
            StateStoreBackend::S3Compatible { endpoint, region } => {
                self.create_s3(endpoint.as_deref(), region, bucket, env).await
            }
            StateStoreBackend::AzureBlob {
                account,
                resource_group,
                location,
            } => {
                self.create_azure(account, resource_group, location, bucket, env)
                    .await
            }
            StateStoreBackend::Gcs { project, location } => {
                self.create_gcs(project, location, bucket, env).await
            }
            StateStoreBackend::Local => Ok(StateStoreOutput {
                details: StateStoreDetails {
                    name: bucket.to_string(),
                    id: bucket.to_string(),
                    hostname: String::new(),
                },
                credentials: None,
            }),
        }
    }
}

/// Treat "already exists and is yours" as success
fn tolerate_existing(result: Result<String>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(Error::Command { message, .. }) if is_already_owned(&message) => {
            info!("State store already exists, reusing it");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_already_owned(stderr: &str) -> bool {
    [
        "BucketAlreadyOwnedByYou",
        "ContainerAlreadyExists",
        "StorageAccountAlreadyExists",
        "HTTPError 409",
        "you already own it",
    ]
    .iter()
    .any(|marker| stderr.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fixtures::record;
    use crate::cluster::{CloudProvider, GitProvider};

    #[test]
    fn bucket_name_includes_cluster_and_id() {
        let rec = record(CloudProvider::Civo, GitProvider::Github);
        assert_eq!(bucket_name(&rec), "k1-state-store-demo-abc123");
    }

    #[test]
    fn existing_bucket_owned_by_caller_is_reused() {
        let err = Error::command(
            "aws s3api create-bucket",
            "An error occurred (BucketAlreadyOwnedByYou) when calling the CreateBucket operation",
        );
        assert!(tolerate_existing(Err(err)).is_ok());
    }

    #[test]
    fn bucket_owned_by_someone_else_fails() {
        let err = Error::command(
            "aws s3api create-bucket",
            "An error occurred (BucketAlreadyExists) when calling the CreateBucket operation",
        );
        assert!(tolerate_existing(Err(err)).is_err());
    }

    #[tokio::test]
    async fn local_backend_creates_nothing() {
        let out = CliStateStore
            .create(&StateStoreBackend::Local, "k1-state-store-demo-abc123", &EnvMap::new())
            .await
            .unwrap();
        assert_eq!(out.details.name, "k1-state-store-demo-abc123");
        assert!(out.credentials.is_none());
    }
}
