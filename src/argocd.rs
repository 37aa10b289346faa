//! ArgoCD REST client and the registry Application
//!
//! ArgoCD is reached through a local port-forward with a self-signed
//! certificate, so the client skips certificate verification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cluster::{ClusterRecord, GitProtocol};
use crate::{Error, Result};

/// Name of the Application that syncs the cluster registry
pub const REGISTRY_APPLICATION: &str = "registry";

/// Namespace ArgoCD runs in
pub const ARGOCD_NAMESPACE: &str = "argocd";

/// Secret holding the generated admin password
pub const ARGOCD_ADMIN_SECRET: &str = "argocd-initial-admin-secret";

/// Username for the ArgoCD admin account
pub const ARGOCD_ADMIN_USER: &str = "admin";

/// ArgoCD API calls the pipeline makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArgoCdApi: Send + Sync {
    /// Exchange admin credentials for a session token
    async fn create_session(&self, base_url: &str, username: &str, password: &str)
        -> Result<String>;

    /// Delete an Application, optionally cascading to its resources
    async fn delete_application(
        &self,
        base_url: &str,
        token: &str,
        name: &str,
        cascade: bool,
    ) -> Result<()>;

    /// Whether an Application exists
    async fn application_exists(&self, base_url: &str, token: &str, name: &str) -> Result<bool>;
}

/// reqwest-backed [`ArgoCdApi`]
#[derive(Clone, Debug)]
pub struct ArgoCdClient {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SessionResponse {
    token: String,
}

impl ArgoCdClient {
    /// Client accepting the self-signed ArgoCD certificate
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(Self::err)?;
        Ok(Self { client })
    }

    fn err(e: impl std::fmt::Display) -> Error {
        Error::http("argocd", e.to_string())
    }
}

#[async_trait]
impl ArgoCdApi for ArgoCdClient {
    async fn create_session(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let session: SessionResponse = self
            .client
            .post(format!("{base_url}/api/v1/session"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(Self::err)?
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)?;
        Ok(session.token)
    }

    async fn delete_application(
        &self,
        base_url: &str,
        token: &str,
        name: &str,
        cascade: bool,
    ) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{base_url}/api/v1/applications/{name}"))
            .query(&[("cascade", cascade)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status().map_err(Self::err)?;
        Ok(())
    }

    async fn application_exists(&self, base_url: &str, token: &str, name: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{base_url}/api/v1/applications/{name}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::err)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Self::err(format!("GET application {name} returned {s}"))),
        }
    }
}

/// The `registry` Application pointing at this cluster's registry directory
pub fn registry_application(record: &ClusterRecord) -> serde_json::Value {
    let repo_url = record.git_provider.repo_url(
        GitProtocol::Ssh,
        &record.git_auth.owner,
        "gitops",
    );
    serde_json::json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {
            "name": REGISTRY_APPLICATION,
            "namespace": ARGOCD_NAMESPACE,
            "annotations": { "argocd.argoproj.io/sync-wave": "1" },
            "finalizers": ["resources-finalizer.argocd.argoproj.io"]
        },
        "spec": {
            "project": "default",
            "source": {
                "repoURL": repo_url,
                "path": format!("registry/clusters/{}", record.cluster_name),
                "targetRevision": "HEAD"
            },
            "destination": {
                "server": "https://kubernetes.default.svc",
                "namespace": ARGOCD_NAMESPACE
            },
            "syncPolicy": {
                "automated": { "prune": true, "selfHeal": true },
                "syncOptions": ["CreateNamespace=true"],
                "retry": {
                    "limit": 5,
                    "backoff": { "duration": "5s", "factor": 2, "maxDuration": "5m0s" }
                }
            }
        }
    })
}

/// Delete an Application with cascade and wait until ArgoCD no longer lists it.
///
/// The deletion runs on its own task and reports over a channel; if the
/// budget runs out first the task is aborted and a timeout is returned.
pub async fn delete_application_with_timeout(
    api: Arc<dyn ArgoCdApi>,
    base_url: String,
    token: String,
    name: String,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let app = name.clone();

    let task = tokio::spawn(async move {
        let result: Result<()> = async {
            api.delete_application(&base_url, &token, &app, true).await?;
            loop {
                if !api.application_exists(&base_url, &token, &app).await? {
                    return Ok(());
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
        .await;
        let _ = tx.send(result);
    });

    tokio::select! {
        result = rx => {
            let result = result
                .unwrap_or_else(|_| Err(Error::http("argocd", "deletion task ended without a result")));
            if result.is_ok() {
                info!(application = %name, "Application deleted");
            }
            result
        }
        _ = tokio::time::sleep(timeout) => {
            task.abort();
            warn!(application = %name, ?timeout, "Application deletion timed out");
            Err(Error::timeout(format!("deletion of application {name}"), timeout))
        }
    }
}
