//! kube-rs implementation of [`KubeOps`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
};
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, info, trace};

use super::{
    poll_until, KubeConnector, KubeOps, PortForward, PortForwardTarget, DEFAULT_POLL_INTERVAL,
};
use crate::command::run_streaming;
use crate::{Error, Result, FIELD_MANAGER};

const KUBECTL: &str = "kubectl";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// `None` uses the ambient configuration (in-cluster or `$KUBECONFIG`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::kube_op(
                    "create_client",
                    format!("failed to read kubeconfig {}: {e}", path.display()),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::kube_op("create_client", format!("failed to load kubeconfig: {e}"))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::kube_op("create_client", format!("failed to infer config: {e}"))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config)
        .map_err(|e| Error::kube_op("create_client", format!("failed to create client: {e}")))
}

/// Connects [`KubeClientOps`] from a kubeconfig file
#[derive(Clone, Debug, Default)]
pub struct KubeClientConnector;

#[async_trait]
impl KubeConnector for KubeClientConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn KubeOps>> {
        let client = create_client(Some(kubeconfig)).await?;
        Ok(Arc::new(KubeClientOps::new(client, kubeconfig)))
    }
}

/// [`KubeOps`] over a kube-rs client
#[derive(Clone)]
pub struct KubeClientOps {
    client: Client,
    kubeconfig: PathBuf,
}

impl KubeClientOps {
    /// Wrap a client; `kubeconfig` is passed to `kubectl` for kustomize
    pub fn new(client: Client, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            client,
            kubeconfig: kubeconfig.into(),
        }
    }
}

fn has_condition(conditions: &[(String, String)], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|(t, status)| t == condition_type && status == "True")
}

#[async_trait]
impl KubeOps for KubeClientOps {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
            .await?;
        debug!(namespace = name, "Namespace ensured");
        Ok(())
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: (!labels.is_empty()).then_some(labels),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k, ByteString(v.into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        };
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await?;
        debug!(namespace, name, "Secret applied");
        Ok(())
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(
                secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
                    .collect(),
            )),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_deployment(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let name_owned = name.to_string();

        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("deployment {namespace}/{name}"),
            || {
                let api = api.clone();
                let name = name_owned.clone();
                async move {
                    match api.get(&name).await {
                        Ok(deployment) => {
                            let conditions: Vec<(String, String)> = deployment
                                .status
                                .and_then(|s| s.conditions)
                                .unwrap_or_default()
                                .into_iter()
                                .map(|c| (c.type_, c.status))
                                .collect();
                            Ok(has_condition(&conditions, "Available"))
                        }
                        Err(kube::Error::Api(e)) if e.code == 404 => {
                            trace!(deployment = %name, "Deployment not found yet");
                            Ok(false)
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            },
        )
        .await?;
        info!(namespace, name, "Deployment available");
        Ok(())
    }

    async fn wait_for_statefulset(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let name_owned = name.to_string();

        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("statefulset {namespace}/{name}"),
            || {
                let api = api.clone();
                let name = name_owned.clone();
                async move {
                    match api.get(&name).await {
                        Ok(sts) => {
                            let desired = sts.spec.and_then(|s| s.replicas).unwrap_or(1);
                            let ready = sts.status.and_then(|s| s.ready_replicas).unwrap_or(0);
                            Ok(ready >= desired)
                        }
                        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
                        Err(e) => Err(e.into()),
                    }
                }
            },
        )
        .await?;
        info!(namespace, name, "StatefulSet ready");
        Ok(())
    }

    async fn wait_for_pod_running(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let name_owned = name.to_string();

        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("pod {namespace}/{name}"),
            || {
                let api = api.clone();
                let name = name_owned.clone();
                async move {
                    match api.get(&name).await {
                        Ok(pod) => Ok(pod
                            .status
                            .and_then(|s| s.phase)
                            .is_some_and(|phase| phase == "Running")),
                        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
                        Err(e) => Err(e.into()),
                    }
                }
            },
        )
        .await
    }

    async fn apply_manifest(&self, manifest: serde_json::Value) -> Result<()> {
        let api_version = manifest["apiVersion"].as_str().unwrap_or_default();
        let kind = manifest["kind"].as_str().unwrap_or_default();
        let name = manifest["metadata"]["name"].as_str().unwrap_or_default();
        if api_version.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(Error::serialization(
                "manifest requires apiVersion, kind and metadata.name",
            ));
        }

        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);

        let api: Api<DynamicObject> = match manifest["metadata"]["namespace"].as_str() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&manifest),
        )
        .await
        .map_err(|e| Error::kube_op("apply_manifest", format!("{kind}/{name}: {e}")))?;

        info!(kind, name, "Manifest applied");
        Ok(())
    }

    async fn apply_kustomize(&self, dir: &Path) -> Result<()> {
        kubectl_apply_kustomize(KUBECTL, &self.kubeconfig, dir).await
    }

    async fn delete_persistent_volume_claims(&self) -> Result<usize> {
        let all: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let claims = all.list(&ListParams::default()).await?;
        let mut deleted = 0;

        for claim in claims.items {
            let (Some(name), Some(namespace)) = (claim.metadata.name, claim.metadata.namespace)
            else {
                continue;
            };
            let api: Api<PersistentVolumeClaim> =
                Api::namespaced(self.client.clone(), &namespace);
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!(namespace = %namespace, claim = %name, "PersistentVolumeClaim deleted");
                    deleted += 1;
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    async fn wait_for_volumes_released(&self, timeout: Duration) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());

        poll_until(timeout, DEFAULT_POLL_INTERVAL, "persistent volumes to release", || {
            let api = api.clone();
            async move {
                let volumes = api.list(&ListParams::default()).await?;
                let bound = volumes
                    .items
                    .iter()
                    .filter(|pv| {
                        pv.status
                            .as_ref()
                            .and_then(|s| s.phase.as_deref())
                            .is_some_and(|phase| phase == "Bound")
                    })
                    .count();
                trace!(bound, "Waiting for volumes to release");
                Ok(bound == 0)
            }
        })
        .await
    }

    async fn port_forward(&self, target: PortForwardTarget) -> Result<PortForward> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        PortForward::start(pods, &target).await
    }
}

/// Server-side apply of a kustomization directory through `kubectl`
async fn kubectl_apply_kustomize(kubectl: &str, kubeconfig: &Path, dir: &Path) -> Result<()> {
    let args = kustomize_args(kubeconfig, dir);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_streaming(kubectl, &args, None, &BTreeMap::new()).await?;
    debug!(dir = %dir.display(), "Kustomization applied");
    Ok(())
}

fn kustomize_args(kubeconfig: &Path, dir: &Path) -> Vec<String> {
    vec![
        "--kubeconfig".to_string(),
        kubeconfig.to_string_lossy().into_owned(),
        "apply".to_string(),
        "--server-side".to_string(),
        "--force-conflicts".to_string(),
        "-k".to_string(),
        dir.to_string_lossy().into_owned(),
    ]
}
