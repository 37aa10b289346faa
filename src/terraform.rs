//! Terraform root modules and the apply/destroy retry policy
//!
//! Every module is applied with [`RetryConfig::terraform`]: one retry after a
//! fixed wait. The environment is rebuilt from the current cluster record
//! before each attempt so a retry never runs with stale credentials.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::cluster::{CloudProvider, GitProvider};
use crate::command::{run_captured, run_streaming};
use crate::retry::{retry_with_policy, RetryConfig};
use crate::{Error, Result};

/// Environment passed to a Terraform invocation
pub type EnvMap = BTreeMap<String, String>;

/// Terraform root modules in the gitops repository
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerraformModule {
    /// `terraform/<github|gitlab>`: repositories, teams, webhooks
    Git,
    /// `terraform/<cloud>`: the cluster itself
    Cloud,
    /// `terraform/vault`: secrets engines, policies, auth backends
    Vault,
    /// `terraform/users`: platform users
    Users,
}

impl TerraformModule {
    /// Every module
    pub const ALL: [TerraformModule; 4] = [Self::Git, Self::Cloud, Self::Vault, Self::Users];

    /// Directory name under `terraform/`
    pub fn dir_name(&self, cloud: CloudProvider, git: GitProvider) -> &'static str {
        match self {
            Self::Git => git.as_str(),
            Self::Cloud => cloud.as_str(),
            Self::Vault => "vault",
            Self::Users => "users",
        }
    }
}

impl std::fmt::Display for TerraformModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Cloud => "cloud",
            Self::Vault => "vault",
            Self::Users => "users",
        };
        f.write_str(s)
    }
}

/// Terraform CLI seam
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TerraformRunner: Send + Sync {
    /// `init` then `apply -auto-approve`
    async fn apply(&self, dir: &Path, env: &EnvMap) -> Result<()>;

    /// `init` then `destroy -auto-approve`
    async fn destroy(&self, dir: &Path, env: &EnvMap) -> Result<()>;

    /// `output -json`, flattened to name -> value
    async fn output(&self, dir: &Path, env: &EnvMap) -> Result<BTreeMap<String, serde_json::Value>>;
}

/// Runs the `terraform` binary
#[derive(Clone, Debug)]
pub struct TerraformCli {
    binary: PathBuf,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    /// Use the given binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, dir: &Path, env: &EnvMap, args: &[&str]) -> Result<String> {
        let binary = self.binary.to_string_lossy();
        run_streaming(&binary, args, Some(dir), env)
            .await
            .map_err(|e| Error::terraform(module_name(dir), e.to_string()))
    }

    async fn init(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.run(dir, env, &["init", "-input=false", "-force-copy"])
            .await
            .map(|_| ())
    }
}

fn module_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[async_trait]
impl TerraformRunner for TerraformCli {
    async fn apply(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.init(dir, env).await?;
        self.run(dir, env, &["apply", "-input=false", "-auto-approve"])
            .await
            .map(|_| ())
    }

    async fn destroy(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.init(dir, env).await?;
        self.run(dir, env, &["destroy", "-input=false", "-auto-approve"])
            .await
            .map(|_| ())
    }

    async fn output(&self, dir: &Path, env: &EnvMap) -> Result<BTreeMap<String, serde_json::Value>> {
        let binary = self.binary.to_string_lossy();
        let raw = run_captured(&binary, &["output", "-json"], Some(dir), env)
            .await
            .map_err(|e| Error::terraform(module_name(dir), e.to_string()))?;
        parse_outputs(&raw)
    }
}

/// Flatten `terraform output -json` (`{"name": {"value": ...}}`) to name -> value
pub fn parse_outputs(raw: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)?;
    Ok(parsed
        .into_iter()
        .map(|(name, entry)| {
            let value = entry.get("value").cloned().unwrap_or(serde_json::Value::Null);
            (name, value)
        })
        .collect())
}

#[derive(Clone, Copy)]
enum Action {
    Apply,
    Destroy,
}

/// Apply a module, retrying once after the policy's fixed delay.
///
/// `build_env` runs before every attempt. Configuration errors from it are
/// returned immediately without a retry.
pub async fn apply_with_retry<F, Fut>(
    runner: &dyn TerraformRunner,
    policy: &RetryConfig,
    dir: &Path,
    build_env: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<EnvMap>>,
{
    run_with_retry(runner, policy, dir, Action::Apply, build_env).await
}

/// Destroy a module with the same policy as [`apply_with_retry`]
pub async fn destroy_with_retry<F, Fut>(
    runner: &dyn TerraformRunner,
    policy: &RetryConfig,
    dir: &Path,
    build_env: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<EnvMap>>,
{
    run_with_retry(runner, policy, dir, Action::Destroy, build_env).await
}

async fn run_with_retry<F, Fut>(
    runner: &dyn TerraformRunner,
    policy: &RetryConfig,
    dir: &Path,
    action: Action,
    mut build_env: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<EnvMap>>,
{
    let module = module_name(dir);
    let verb = match action {
        Action::Apply => "apply",
        Action::Destroy => "destroy",
    };
    let operation = format!("terraform {verb} {module}");

    retry_with_policy(policy, &operation, Error::is_retryable, || {
        let env = build_env();
        async move {
            let env = env.await?;
            info!(module = %module_name(dir), action = verb, "Running terraform");
            match action {
                Action::Apply => runner.apply(dir, &env).await,
                Action::Destroy => runner.destroy(dir, &env).await,
            }
        }
    })
    .await?;

    info!(module = %module, action = verb, "Terraform finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy() -> RetryConfig {
        RetryConfig::fixed(2, Duration::from_millis(1))
    }

    fn env_counter() -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<EnvMap>>) {
        let builds = Arc::new(AtomicU32::new(0));
        let b = builds.clone();
        let build = move || {
            let n = b.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(EnvMap::from([(
                "AWS_SESSION_TOKEN".to_string(),
                format!("token-{n}"),
            )])))
        };
        (builds, build)
    }

    #[tokio::test]
    async fn two_failures_mean_two_invocations_and_an_error() {
        let mut runner = MockTerraformRunner::new();
        runner
            .expect_apply()
            .times(2)
            .returning(|_, _| Err(Error::terraform("civo", "quota exceeded")));

        let (builds, build) = env_counter();
        let err = apply_with_retry(&runner, &fast_policy(), Path::new("/g/terraform/civo"), build)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Terraform { .. }));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_then_success_means_two_invocations() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut runner = MockTerraformRunner::new();
        runner.expect_apply().times(2).returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::terraform("github", "rate limited"))
            } else {
                Ok(())
            }
        });

        let (_, build) = env_counter();
        apply_with_retry(&runner, &fast_policy(), Path::new("/g/terraform/github"), build)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn each_attempt_sees_a_freshly_built_env() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut runner = MockTerraformRunner::new();
        runner.expect_apply().times(2).returning(move |_, env| {
            s.lock().unwrap().push(env["AWS_SESSION_TOKEN"].clone());
            Err(Error::terraform("aws", "ExpiredToken"))
        });

        let (_, build) = env_counter();
        let _ = apply_with_retry(&runner, &fast_policy(), Path::new("/g/terraform/aws"), build).await;

        assert_eq!(*seen.lock().unwrap(), vec!["token-0", "token-1"]);
    }

    #[tokio::test]
    async fn env_configuration_error_is_not_retried() {
        let mut runner = MockTerraformRunner::new();
        runner.expect_apply().never();

        let builds = Arc::new(AtomicU32::new(0));
        let b = builds.clone();
        let err = apply_with_retry(&runner, &fast_policy(), Path::new("/g/terraform/vault"), || {
            b.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(Error::configuration("missing VAULT_TOKEN")))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn destroy_uses_the_same_policy() {
        let mut runner = MockTerraformRunner::new();
        runner
            .expect_destroy()
            .times(2)
            .returning(|_, _| Err(Error::terraform("aws", "DependencyViolation")));

        let (_, build) = env_counter();
        assert!(
            destroy_with_retry(&runner, &fast_policy(), Path::new("/g/terraform/aws"), build)
                .await
                .is_err()
        );
    }

    #[test]
    fn module_directories() {
        assert_eq!(
            TerraformModule::Git.dir_name(CloudProvider::Aws, GitProvider::Gitlab),
            "gitlab"
        );
        assert_eq!(
            TerraformModule::Cloud.dir_name(CloudProvider::DigitalOcean, GitProvider::Github),
            "digitalocean"
        );
        assert_eq!(
            TerraformModule::Users.dir_name(CloudProvider::K3d, GitProvider::Github),
            "users"
        );
    }

    #[test]
    fn outputs_are_flattened() {
        let raw = r#"{"kms_key_id":{"sensitive":false,"type":"string","value":"key-1"},
                      "node_count":{"sensitive":false,"type":"number","value":3}}"#;
        let outputs = parse_outputs(raw).unwrap();
        assert_eq!(outputs["kms_key_id"], "key-1");
        assert_eq!(outputs["node_count"], 3);
        assert!(parse_outputs("").unwrap().is_empty());
    }
}
