//! Credential bundles carried on the cluster record
//!
//! Cloud bundles are read from the operator's environment when the record is
//! created. Generated material (bot keypair, Vault root token, state-store
//! details) is written back by pipeline steps.

use serde::{Deserialize, Serialize};

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Git provider identity and the generated bot keypair
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GitAuth {
    /// User, organization or group owning the repositories
    pub owner: String,
    /// Authenticated user name
    pub user: String,
    /// API token
    pub token: String,
    /// OpenSSH public key of the bot user
    pub public_key: String,
    /// PEM private key of the bot user
    pub private_key: String,
}

impl GitAuth {
    /// Whether the bot keypair has been generated
    pub fn has_keypair(&self) -> bool {
        !self.public_key.is_empty() && !self.private_key.is_empty()
    }
}

/// AWS credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AwsAuth {
    /// AWS access key ID
    pub access_key_id: String,
    /// AWS secret access key
    pub secret_access_key: String,
    /// Session token for temporary credentials
    pub session_token: String,
}

impl AwsAuth {
    /// Load credentials from environment variables
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: env("AWS_SECRET_ACCESS_KEY")?,
            session_token: env("AWS_SESSION_TOKEN").unwrap_or_default(),
        })
    }
}

/// Azure service principal
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AzureAuth {
    /// Service principal client ID
    pub client_id: String,
    /// Service principal secret
    pub client_secret: String,
    /// Tenant ID
    pub tenant_id: String,
    /// Subscription ID
    pub subscription_id: String,
}

impl AzureAuth {
    /// Load credentials from the `ARM_*` environment variables
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: env("ARM_CLIENT_ID")?,
            client_secret: env("ARM_CLIENT_SECRET")?,
            tenant_id: env("ARM_TENANT_ID")?,
            subscription_id: env("ARM_SUBSCRIPTION_ID")?,
        })
    }
}

/// Google service account
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GoogleAuth {
    /// Project ID
    pub project_id: String,
    /// Path to the service account key file
    pub key_file: String,
    /// Service account key JSON
    pub key_json: String,
}

impl GoogleAuth {
    /// Load the key referenced by `GOOGLE_APPLICATION_CREDENTIALS`
    pub fn from_env() -> Option<Self> {
        let key_file = env("GOOGLE_APPLICATION_CREDENTIALS")?;
        let key_json = std::fs::read_to_string(&key_file).ok()?;
        Some(Self {
            project_id: env("GOOGLE_PROJECT")?,
            key_file,
            key_json,
        })
    }
}

/// Civo API token
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CivoAuth {
    /// API token
    pub token: String,
}

impl CivoAuth {
    /// Load from `CIVO_TOKEN`
    pub fn from_env() -> Option<Self> {
        Some(Self {
            token: env("CIVO_TOKEN")?,
        })
    }
}

/// DigitalOcean API token and Spaces keys
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DigitalOceanAuth {
    /// API token
    pub token: String,
    /// Spaces access key
    pub spaces_key: String,
    /// Spaces secret
    pub spaces_secret: String,
}

impl DigitalOceanAuth {
    /// Load from `DO_TOKEN` and `SPACES_*`
    pub fn from_env() -> Option<Self> {
        Some(Self {
            token: env("DO_TOKEN")?,
            spaces_key: env("SPACES_ACCESS_KEY_ID")?,
            spaces_secret: env("SPACES_SECRET_ACCESS_KEY")?,
        })
    }
}

/// Vultr API key
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct VultrAuth {
    /// API key
    pub token: String,
}

impl VultrAuth {
    /// Load from `VULTR_API_KEY`
    pub fn from_env() -> Option<Self> {
        Some(Self {
            token: env("VULTR_API_KEY")?,
        })
    }
}

/// Cloudflare credentials for DNS and the origin issuer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CloudflareAuth {
    /// API token with DNS edit rights
    pub api_token: String,
    /// Origin CA key, required for the origin issuer
    pub origin_ca_issuer_key: String,
}

impl CloudflareAuth {
    /// Load from `CF_API_TOKEN` and `CF_ORIGIN_CA_ISSUER_API_TOKEN`
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api_token: env("CF_API_TOKEN")?,
            origin_ca_issuer_key: env("CF_ORIGIN_CA_ISSUER_API_TOKEN").unwrap_or_default(),
        })
    }
}

/// Vault root credentials written by the initialize step
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct VaultAuth {
    /// Root token
    pub root_token: String,
    /// Unseal keys
    pub unseal_keys: Vec<String>,
}

/// Object-storage credentials used by the Terraform backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StateStoreCredentials {
    /// Access key ID (storage account name on Azure)
    pub access_key_id: String,
    /// Secret access key (storage account key on Azure)
    pub secret_access_key: String,
    /// Session token for temporary credentials
    pub session_token: String,
}

impl StateStoreCredentials {
    /// Load from `STATE_STORE_ACCESS_KEY_ID` / `STATE_STORE_SECRET_ACCESS_KEY`
    pub fn from_env() -> Self {
        Self {
            access_key_id: env("STATE_STORE_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: env("STATE_STORE_SECRET_ACCESS_KEY").unwrap_or_default(),
            session_token: env("STATE_STORE_SESSION_TOKEN").unwrap_or_default(),
        }
    }

    /// Whether an access key pair is present
    pub fn is_set(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

/// State-store bucket written by the state-store step
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StateStoreDetails {
    /// Bucket (or container) name
    pub name: String,
    /// Provider-side identifier
    pub id: String,
    /// Endpoint host name
    pub hostname: String,
}

/// Every cloud credential bundle; only the selected cloud's is required
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CloudCredentials {
    /// AWS
    pub aws: Option<AwsAuth>,
    /// Azure
    pub azure: Option<AzureAuth>,
    /// Google
    pub google: Option<GoogleAuth>,
    /// Civo
    pub civo: Option<CivoAuth>,
    /// DigitalOcean
    pub digitalocean: Option<DigitalOceanAuth>,
    /// Vultr
    pub vultr: Option<VultrAuth>,
    /// Cloudflare
    pub cloudflare: Option<CloudflareAuth>,
}

impl CloudCredentials {
    /// Collect whatever bundles the environment provides
    pub fn from_env() -> Self {
        Self {
            aws: AwsAuth::from_env(),
            azure: AzureAuth::from_env(),
            google: GoogleAuth::from_env(),
            civo: CivoAuth::from_env(),
            digitalocean: DigitalOceanAuth::from_env(),
            vultr: VultrAuth::from_env(),
            cloudflare: CloudflareAuth::from_env(),
        }
    }
}
