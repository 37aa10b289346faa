//! Vault HTTP client for initialization and unsealing

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::cluster::VaultAuth;
use crate::{Error, Result};

/// Namespace Vault runs in
pub const VAULT_NAMESPACE: &str = "vault";
/// Pod that is initialized and unsealed
pub const VAULT_POD: &str = "vault-0";
/// Secret persisting the root token and unseal keys
pub const UNSEAL_SECRET: &str = "vault-unseal-secret";
/// Key shares generated at init
pub const SECRET_SHARES: u8 = 5;
/// Shares needed to unseal
pub const SECRET_THRESHOLD: u8 = 3;

const ROOT_TOKEN_KEY: &str = "root-token";
const UNSEAL_KEYS_KEY: &str = "unseal-keys";

/// `/v1/sys/health` body
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VaultHealth {
    /// Whether `sys/init` has run
    pub initialized: bool,
    /// Whether the barrier is sealed
    pub sealed: bool,
}

/// `/v1/sys/init` body
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct VaultInit {
    /// Hex unseal key shares
    pub keys: Vec<String>,
    /// Initial root token
    pub root_token: String,
}

/// Vault API calls the pipeline makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Health, with sealed and uninitialized reported as 200
    async fn health(&self, base_url: &str) -> Result<VaultHealth>;

    /// Initialize with the given share layout
    async fn init(&self, base_url: &str, shares: u8, threshold: u8) -> Result<VaultInit>;

    /// Submit one unseal key; returns whether Vault is still sealed
    async fn unseal(&self, base_url: &str, key: &str) -> Result<bool>;
}

/// reqwest-backed [`VaultApi`]
#[derive(Clone, Debug)]
pub struct VaultClient {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SealStatus {
    sealed: bool,
}

impl VaultClient {
    /// New client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(Self::err)?;
        Ok(Self { client })
    }

    fn err(e: impl std::fmt::Display) -> Error {
        Error::http("vault", e.to_string())
    }
}

#[async_trait]
impl VaultApi for VaultClient {
    async fn health(&self, base_url: &str) -> Result<VaultHealth> {
        self.client
            .get(format!("{base_url}/v1/sys/health"))
            .query(&[
                ("standbyok", "true"),
                ("sealedcode", "200"),
                ("uninitcode", "200"),
            ])
            .send()
            .await
            .map_err(Self::err)?
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)
    }

    async fn init(&self, base_url: &str, shares: u8, threshold: u8) -> Result<VaultInit> {
        self.client
            .put(format!("{base_url}/v1/sys/init"))
            .json(&serde_json::json!({
                "secret_shares": shares,
                "secret_threshold": threshold,
            }))
            .send()
            .await
            .map_err(Self::err)?
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)
    }

    async fn unseal(&self, base_url: &str, key: &str) -> Result<bool> {
        let status: SealStatus = self
            .client
            .put(format!("{base_url}/v1/sys/unseal"))
            .json(&serde_json::json!({ "key": key }))
            .send()
            .await
            .map_err(Self::err)?
            .error_for_status()
            .map_err(Self::err)?
            .json()
            .await
            .map_err(Self::err)?;
        Ok(status.sealed)
    }
}

/// Secret data for `vault/vault-unseal-secret`
pub fn unseal_secret_data(auth: &VaultAuth) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ROOT_TOKEN_KEY.to_string(), auth.root_token.clone()),
        (UNSEAL_KEYS_KEY.to_string(), auth.unseal_keys.join("\n")),
    ])
}

/// Credentials from an existing unseal secret; `None` if incomplete
pub fn vault_auth_from_secret(data: &BTreeMap<String, String>) -> Option<VaultAuth> {
    let root_token = data.get(ROOT_TOKEN_KEY).filter(|t| !t.is_empty())?.clone();
    let unseal_keys = data
        .get(UNSEAL_KEYS_KEY)
        .map(|keys| {
            keys.lines()
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(VaultAuth {
        root_token,
        unseal_keys,
    })
}
