//! Local port-forward to a pod
//!
//! The forwarder runs on a background task that accepts local connections
//! and bridges each one over a kube-rs portforward stream. Dropping the
//! [`PortForward`] handle signals the task to stop.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Local port for the ArgoCD server forward
pub const ARGOCD_LOCAL_PORT: u16 = 8080;
/// Local port for the Vault forward
pub const VAULT_LOCAL_PORT: u16 = 8200;

/// Pod selection and ports for a forward
#[derive(Clone, Debug, PartialEq)]
pub struct PortForwardTarget {
    /// Namespace of the pod
    pub namespace: String,
    /// Label selector picking the pod
    pub selector: String,
    /// Port on the pod
    pub remote_port: u16,
    /// Port bound on 127.0.0.1
    pub local_port: u16,
    /// URL scheme served on the port
    pub scheme: &'static str,
}

impl PortForwardTarget {
    /// ArgoCD API server
    pub fn argocd() -> Self {
        Self {
            namespace: "argocd".into(),
            selector: "app.kubernetes.io/name=argocd-server".into(),
            remote_port: 8080,
            local_port: ARGOCD_LOCAL_PORT,
            scheme: "https",
        }
    }

    /// Vault active pod
    pub fn vault() -> Self {
        Self {
            namespace: "vault".into(),
            selector: "app.kubernetes.io/name=vault,statefulset.kubernetes.io/pod-name=vault-0"
                .into(),
            remote_port: 8200,
            local_port: VAULT_LOCAL_PORT,
            scheme: "http",
        }
    }

    /// `<scheme>://127.0.0.1:<local_port>`
    pub fn local_url(&self) -> String {
        format!("{}://127.0.0.1:{}", self.scheme, self.local_port)
    }
}

/// Handle to a running forward; closes the forward when dropped
pub struct PortForward {
    url: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PortForward {
    /// Handle without a background task, for fakes
    pub fn detached(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stop: None,
            task: None,
        }
    }

    /// Local URL of the forwarded service
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start forwarding to the first running pod matching the target
    pub async fn start(pods: Api<Pod>, target: &PortForwardTarget) -> Result<Self> {
        let pod_name = running_pod(&pods, target).await?;
        let listener = TcpListener::bind(("127.0.0.1", target.local_port)).await?;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let remote_port = target.remote_port;

        info!(
            namespace = %target.namespace,
            pod = %pod_name,
            local_port = target.local_port,
            remote_port,
            "Port-forward started"
        );

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    accepted = listener.accept() => {
                        let (conn, _) = match accepted {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                warn!(error = %e, "Port-forward listener failed");
                                break;
                            }
                        };
                        let pods = pods.clone();
                        let pod_name = pod_name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = bridge(&pods, &pod_name, remote_port, conn).await {
                                debug!(pod = %pod_name, error = %e, "Port-forward connection closed");
                            }
                        });
                    }
                }
            }
            debug!(pod = %pod_name, "Port-forward stopped");
        });

        Ok(Self {
            url: target.local_url(),
            stop: Some(stop_tx),
            task: Some(task),
        })
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn running_pod(pods: &Api<Pod>, target: &PortForwardTarget) -> Result<String> {
    let list = pods
        .list(&ListParams::default().labels(&target.selector))
        .await?;
    list.items
        .iter()
        .find(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .and_then(|p| p.metadata.name.clone())
        .ok_or_else(|| {
            Error::kube_op(
                "port_forward",
                format!(
                    "no running pod in {} matches {}",
                    target.namespace, target.selector
                ),
            )
        })
}

async fn bridge(pods: &Api<Pod>, pod_name: &str, port: u16, mut conn: TcpStream) -> Result<()> {
    let mut forwarder = pods.portforward(pod_name, &[port]).await?;
    let mut upstream = forwarder.take_stream(port).ok_or_else(|| {
        Error::kube_op("port_forward", format!("no stream for port {port}"))
    })?;

    copy_bidirectional(&mut conn, &mut upstream).await?;
    drop(upstream);

    forwarder
        .join()
        .await
        .map_err(|e| Error::kube_op("port_forward", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_build_local_urls() {
        assert_eq!(PortForwardTarget::argocd().local_url(), "https://127.0.0.1:8080");
        assert_eq!(PortForwardTarget::vault().local_url(), "http://127.0.0.1:8200");
    }

    #[test]
    fn detached_handle_drops_cleanly() {
        let pf = PortForward::detached("http://127.0.0.1:8200");
        assert_eq!(pf.url(), "http://127.0.0.1:8200");
        drop(pf);
    }
}
