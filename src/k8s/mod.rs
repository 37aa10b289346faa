//! Kubernetes operations used by the pipeline
//!
//! Steps talk to the provisioned cluster through [`KubeOps`]; the real
//! implementation ([`KubeClientOps`]) uses kube-rs directly and only shells out
//! to `kubectl` for kustomize builds.

mod client;
mod port_forward;

pub use client::{create_client, KubeClientConnector, KubeClientOps};
pub use port_forward::{PortForward, PortForwardTarget};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::trace;

use crate::{Error, Result};

/// Default interval for readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Operations against a provisioned cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeOps: Send + Sync {
    /// Create a namespace if it does not exist
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Create or replace an Opaque secret
    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Read a secret's string data; `None` if absent
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Wait for a Deployment to report Available
    async fn wait_for_deployment(&self, namespace: &str, name: &str, timeout: Duration)
        -> Result<()>;

    /// Wait for a StatefulSet to have all replicas ready
    async fn wait_for_statefulset(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Wait for a pod to reach phase Running
    async fn wait_for_pod_running(&self, namespace: &str, name: &str, timeout: Duration)
        -> Result<()>;

    /// Server-side apply of a single JSON manifest
    async fn apply_manifest(&self, manifest: serde_json::Value) -> Result<()>;

    /// Apply a kustomization directory
    async fn apply_kustomize(&self, dir: &Path) -> Result<()>;

    /// Delete every PersistentVolumeClaim; returns how many were deleted
    async fn delete_persistent_volume_claims(&self) -> Result<usize>;

    /// Wait until no PersistentVolume remains bound
    async fn wait_for_volumes_released(&self, timeout: Duration) -> Result<()>;

    /// Forward a local port to a pod behind the target
    async fn port_forward(&self, target: PortForwardTarget) -> Result<PortForward>;
}

/// Builds [`KubeOps`] for a kubeconfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeConnector: Send + Sync {
    /// Connect to the cluster described by `kubeconfig`
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn KubeOps>>;
}

/// Poll `check_fn` until it returns `Ok(true)` or `timeout` elapses.
///
/// Transient errors from `check_fn` are treated as "not yet" and the last one
/// is reported in the [`Error::Timeout`]. Any other error ends the wait at once.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    operation: impl Into<String>,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = std::time::Instant::now();
    let operation = operation.into();
    let mut last_error = None;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(operation = %operation, "Condition not yet met"),
            Err(e) if e.is_retryable() => {
                trace!(operation = %operation, error = %e, "Poll check failed, retrying");
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() >= timeout {
            return Err(Error::Timeout {
                operation,
                after: timeout,
                last_error,
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}
