//! GitHub and GitLab REST calls

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cluster::GitProvider;
use crate::{Error, Result};

const GITHUB_API: &str = "https://api.github.com";
const GITLAB_API: &str = "https://gitlab.com/api/v4";

/// Classic token scopes the GitHub modules need
pub const GITHUB_REQUIRED_SCOPES: [&str; 7] = [
    "admin:org",
    "admin:public_key",
    "admin:repo_hook",
    "delete_repo",
    "repo",
    "workflow",
    "write:packages",
];

/// Calls against the git SaaS provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GitProviderApi: Send + Sync {
    /// Fail with a configuration error if `token` lacks required scopes
    async fn verify_token_scopes(&self, token: &str) -> Result<()>;

    /// Whether `owner/name` exists
    async fn repository_exists(&self, owner: &str, token: &str, name: &str) -> Result<bool>;

    /// Remove the bot's SSH key registered under `title`, if any
    async fn delete_user_ssh_key(&self, token: &str, title: &str) -> Result<()>;
}

/// API client for the given git provider
pub fn create_git_provider_api(git: GitProvider) -> Result<Arc<dyn GitProviderApi>> {
    Ok(match git {
        GitProvider::Github => Arc::new(GithubApi::new(GITHUB_API)?),
        GitProvider::Gitlab => Arc::new(GitlabApi::new(GITLAB_API)?),
    })
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("kubefirst/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::http("git provider", e.to_string()))
}

/// GitHub REST v3
#[derive(Clone, Debug)]
pub struct GithubApi {
    client: reqwest::Client,
    base_url: String,
}

impl GithubApi {
    /// Client against `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
        })
    }

    fn err(e: impl std::fmt::Display) -> Error {
        Error::http("github", e.to_string())
    }
}

/// Scopes from `required` absent in an `x-oauth-scopes` header value
pub fn missing_github_scopes<'a>(header: &str, required: &[&'a str]) -> Vec<&'a str> {
    let granted: Vec<&str> = header.split(',').map(str::trim).collect();
    required
        .iter()
        .copied()
        .filter(|scope| !granted.contains(scope))
        .collect()
}

#[async_trait]
impl GitProviderApi for GithubApi {
    async fn verify_token_scopes(&self, token: &str) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::err)?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::configuration("GITHUB_TOKEN was rejected by github"));
        }
        let resp = resp.error_for_status().map_err(Self::err)?;

        let Some(header) = resp.headers().get("x-oauth-scopes") else {
            return Err(Error::configuration(
                "GITHUB_TOKEN must be a classic personal access token with scopes",
            ));
        };
        let header = header.to_str().map_err(Self::err)?;
        let missing = missing_github_scopes(header, &GITHUB_REQUIRED_SCOPES);
        if !missing.is_empty() {
            return Err(Error::configuration(format!(
                "GITHUB_TOKEN is missing scopes: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    async fn repository_exists(&self, owner: &str, token: &str, name: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/repos/{owner}/{name}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::err)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Self::err(format!("GET repos/{owner}/{name} returned {s}"))),
        }
    }

    async fn delete_user_ssh_key(&self, _token: &str, title: &str) -> Result<()> {
        // the github terraform module owns the key and removes it on destroy
        debug!(title = %title, "Skipping ssh key removal on github");
        Ok(())
    }
}

/// GitLab REST v4
#[derive(Clone, Debug)]
pub struct GitlabApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    id: u64,
    title: String,
}

impl GitlabApi {
    /// Client against `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
        })
    }

    fn err(e: impl std::fmt::Display) -> Error {
        Error::http("gitlab", e.to_string())
    }
}

/// `owner/name` as a single URL path segment
pub fn gitlab_project_path(owner: &str, name: &str) -> String {
    format!("{owner}/{name}").replace('/', "%2F")
}

#[async_trait]
impl GitProviderApi for GitlabApi {
    async fn verify_token_scopes(&self, token: &str) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/personal_access_tokens/self", self.base_url))
            .header("PRIVATE-TOKEN", token)
            .send()
            .await
            .map_err(Self::err)?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::configuration("GITLAB_TOKEN was rejected by gitlab"));
        }
        let info: TokenInfo = resp
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)?;

        if !info.scopes.iter().any(|s| s == "api") {
            return Err(Error::configuration(format!(
                "GITLAB_TOKEN needs the api scope, has: {}",
                info.scopes.join(", ")
            )));
        }
        Ok(())
    }

    async fn repository_exists(&self, owner: &str, token: &str, name: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!(
                "{}/projects/{}",
                self.base_url,
                gitlab_project_path(owner, name)
            ))
            .header("PRIVATE-TOKEN", token)
            .send()
            .await
            .map_err(Self::err)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Self::err(format!("GET projects/{owner}/{name} returned {s}"))),
        }
    }

    async fn delete_user_ssh_key(&self, token: &str, title: &str) -> Result<()> {
        let keys: Vec<SshKey> = self
            .client
            .get(format!("{}/user/keys", self.base_url))
            .header("PRIVATE-TOKEN", token)
            .send()
            .await
            .map_err(Self::err)?
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)?;

        for key in keys.iter().filter(|k| k.title == title) {
            self.client
                .delete(format!("{}/user/keys/{}", self.base_url, key.id))
                .header("PRIVATE-TOKEN", token)
                .send()
                .await
                .map_err(Self::err)?
                .error_for_status()
                .map_err(Self::err)?;
            info!(title = %title, id = key.id, "Deleted gitlab ssh key");
        }
        Ok(())
    }
}
