//! Topology selectors stored on the cluster record

use serde::{Deserialize, Serialize};

/// Supported cloud providers
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services (EKS)
    Aws,
    /// Microsoft Azure (AKS)
    Azure,
    /// Google Cloud (GKE)
    Google,
    /// Civo (k3s)
    Civo,
    /// DigitalOcean (DOKS)
    DigitalOcean,
    /// Vultr (VKE)
    Vultr,
    /// Local k3d cluster
    K3d,
}

impl CloudProvider {
    /// Every supported cloud, in dispatch order
    pub const ALL: [CloudProvider; 7] = [
        Self::Aws,
        Self::Azure,
        Self::Google,
        Self::Civo,
        Self::DigitalOcean,
        Self::Vultr,
        Self::K3d,
    ];

    /// Lowercase identifier, also the Terraform root module directory name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Google => "google",
            Self::Civo => "civo",
            Self::DigitalOcean => "digitalocean",
            Self::Vultr => "vultr",
            Self::K3d => "k3d",
        }
    }

    /// Provider name external-dns uses when the cloud hosts the DNS zone
    pub fn external_dns_provider(&self) -> &'static str {
        match self {
            Self::K3d => "",
            other => other.as_str(),
        }
    }

    /// Local clusters have no public DNS
    pub fn is_local(&self) -> bool {
        matches!(self, Self::K3d)
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "google" => Ok(Self::Google),
            "civo" => Ok(Self::Civo),
            "digitalocean" => Ok(Self::DigitalOcean),
            "vultr" => Ok(Self::Vultr),
            "k3d" => Ok(Self::K3d),
            _ => Err(crate::Error::configuration(format!(
                "unsupported cloud provider: {s}, expected one of: aws, azure, google, civo, digitalocean, vultr, k3d"
            ))),
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported git providers
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    /// github.com
    Github,
    /// gitlab.com
    Gitlab,
}

impl GitProvider {
    /// Every supported git provider
    pub const ALL: [GitProvider; 2] = [Self::Github, Self::Gitlab];

    /// Lowercase identifier, also the Terraform root module directory name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    /// SaaS host name
    pub fn host(&self) -> &'static str {
        match self {
            Self::Github => "github.com",
            Self::Gitlab => "gitlab.com",
        }
    }

    /// Environment key carrying the API token
    pub fn token_env(&self) -> &'static str {
        match self {
            Self::Github => "GITHUB_TOKEN",
            Self::Gitlab => "GITLAB_TOKEN",
        }
    }

    /// Environment key carrying the owner (user, org or group)
    pub fn owner_env(&self) -> &'static str {
        match self {
            Self::Github => "GITHUB_OWNER",
            Self::Gitlab => "GITLAB_OWNER",
        }
    }

    /// Container registry namespace for the owner
    pub fn container_registry(&self, owner: &str) -> String {
        match self {
            Self::Github => format!("ghcr.io/{owner}"),
            Self::Gitlab => format!("registry.gitlab.com/{owner}"),
        }
    }

    /// `<GIT_FQDN>` value for the given protocol
    pub fn fqdn(&self, protocol: GitProtocol) -> String {
        match protocol {
            GitProtocol::Https => format!("https://{}/", self.host()),
            GitProtocol::Ssh => format!("git@{}:", self.host()),
        }
    }

    /// Clone URL of `owner/repo` for the given protocol
    pub fn repo_url(&self, protocol: GitProtocol, owner: &str, repo: &str) -> String {
        format!("{}{owner}/{repo}.git", self.fqdn(protocol))
    }
}

impl std::str::FromStr for GitProvider {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            _ => Err(crate::Error::configuration(format!(
                "unsupported git provider: {s}, expected one of: github, gitlab"
            ))),
        }
    }
}

impl std::fmt::Display for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol used in repository URLs written into the gitops tree
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GitProtocol {
    /// `https://host/owner/repo.git`
    #[default]
    Https,
    /// `git@host:owner/repo.git`
    Ssh,
}

impl std::str::FromStr for GitProtocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "https" => Ok(Self::Https),
            "ssh" => Ok(Self::Ssh),
            _ => Err(crate::Error::configuration(format!(
                "invalid git protocol: {s}, expected https or ssh"
            ))),
        }
    }
}

/// Management or workload cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Hosts the platform itself
    #[default]
    Mgmt,
    /// Runs applications, registered to a management cluster
    Workload,
}

impl ClusterType {
    /// Lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mgmt => "mgmt",
            Self::Workload => "workload",
        }
    }
}

/// Where DNS records for the platform are managed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    /// The cloud provider's DNS service
    #[default]
    Cloud,
    /// Cloudflare
    Cloudflare,
}

/// Lifecycle status of the cluster record
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    /// Create pipeline has not finished
    #[default]
    Provisioning,
    /// Final check passed
    Provisioned,
    /// Destroy pipeline running
    Deleting,
    /// Destroy pipeline finished
    Deleted,
    /// Last run aborted on an error
    Error,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
