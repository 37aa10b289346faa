//! Liveness probes against the provisioned platform

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::lookup_host;
use tracing::trace;

use crate::Result;

/// External reachability checks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether `host` currently resolves to at least one address
    async fn domain_resolves(&self, host: &str) -> Result<bool>;
}

/// Resolves names with the system resolver
#[derive(Clone, Debug, Default)]
pub struct DnsProbe;

#[async_trait]
impl HealthProbe for DnsProbe {
    async fn domain_resolves(&self, host: &str) -> Result<bool> {
        match lookup_host((host, 443)).await {
            Ok(mut addrs) => Ok(addrs.next().is_some()),
            Err(e) => {
                trace!(host = %host, error = %e, "Host does not resolve yet");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn localhost_resolves() {
        assert!(DnsProbe.domain_resolves("localhost").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_name_does_not_resolve() {
        assert!(!DnsProbe
            .domain_resolves("no-such-host.invalid")
            .await
            .unwrap());
    }
}
