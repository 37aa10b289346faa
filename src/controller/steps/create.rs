//! Create pipeline step bodies

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::blocking;
use crate::argocd::{
    registry_application, ARGOCD_ADMIN_SECRET, ARGOCD_ADMIN_USER, ARGOCD_NAMESPACE,
};
use crate::cluster::{ClusterRecord, ClusterStatus, DnsProvider, StepOutput, VaultAuth};
use crate::controller::context::PipelineContext;
use crate::detokenize::TemplateValues;
use crate::k8s::{poll_until, KubeOps, PortForwardTarget};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::ssh::{generate_kbot_keys, generate_webhook_secret};
use crate::state_store::bucket_name;
use crate::terraform::{apply_with_retry, TerraformModule};
use crate::vault::{
    unseal_secret_data, vault_auth_from_secret, SECRET_SHARES, SECRET_THRESHOLD, UNSEAL_SECRET,
    VAULT_NAMESPACE, VAULT_POD,
};
use crate::{Error, Result};

/// Repositories created in the git owner's namespace
pub(crate) const REPOSITORIES: [&str; 2] = ["gitops", "metaphor"];

/// Branch pushed to both repositories
const DEFAULT_BRANCH: &str = "main";

const COMMIT_MESSAGE: &str = "committing initial detokenized gitops-template repo content";

const CLOUD_OUTPUTS_COMMIT_MESSAGE: &str = "committing detokenized cloud outputs";

/// Namespaces created before any secret is written
const PLATFORM_NAMESPACES: [&str; 8] = [
    "argocd",
    "argo",
    "atlantis",
    "cert-manager",
    "external-dns",
    "kubefirst",
    "vault",
    "external-secrets-operator",
];

const INITIAL_SECRETS: (&str, &str) = ("kubefirst", "kubefirst-initial-secrets");
const REPO_CREDS_SECRET: &str = "repo-credentials-template";
const REPO_CREDS_LABEL: (&str, &str) = ("argocd.argoproj.io/secret-type", "repo-creds");
const CLOUDFLARE_SECRET: (&str, &str) = ("cert-manager", "cloudflare-creds");

/// Attempts at an ArgoCD session while the API server warms up
const ARGOCD_SESSION_ATTEMPTS: u32 = 5;

fn ssh_repo_url(record: &ClusterRecord, name: &str) -> String {
    format!(
        "git@{}:{}/{name}.git",
        record.git_provider.host(),
        record.git_auth.owner
    )
}

async fn apply_module(ctx: &PipelineContext, module: TerraformModule) -> Result<()> {
    let dir = ctx.terraform_dir(module);
    info!(cluster = %ctx.cluster_name, module = %module, "Applying Terraform module");
    apply_with_retry(
        ctx.services.terraform.as_ref(),
        &ctx.terraform_policy(),
        &dir,
        move || async move {
            let record = ctx.reload().await?;
            ctx.adapter.terraform_env(module, &record, &ctx.layout)
        },
    )
    .await
}

// =============================================================================
// Local and git provider steps
// =============================================================================

pub(super) async fn git_init(ctx: &PipelineContext, record: &ClusterRecord) -> Result<StepOutput> {
    let auth = &record.git_auth;
    if auth.token.is_empty() {
        return Err(Error::configuration(format!(
            "{} is not set",
            record.git_provider.token_env()
        )));
    }

    ctx.services.git_api.verify_token_scopes(&auth.token).await?;

    for name in REPOSITORIES {
        if ctx
            .services
            .git_api
            .repository_exists(&auth.owner, &auth.token, name)
            .await?
        {
            return Err(Error::configuration(format!(
                "repository {}/{name} already exists on {}",
                auth.owner,
                record.git_provider.host()
            )));
        }
    }

    info!(cluster = %record.cluster_name, owner = %auth.owner, "Git credentials verified");
    Ok(StepOutput::default())
}

pub(super) fn kbot_setup(record: &ClusterRecord) -> Result<StepOutput> {
    let mut output = StepOutput::default();

    if !record.git_auth.has_keypair() {
        output.kbot_keys = Some(generate_kbot_keys()?);
    }
    if record.webhook_secret.is_empty() {
        output.webhook_secret = Some(generate_webhook_secret());
    }

    debug!(
        cluster = %record.cluster_name,
        new_keypair = output.kbot_keys.is_some(),
        new_webhook_secret = output.webhook_secret.is_some(),
        "Bot credentials ready"
    );
    Ok(output)
}

pub(super) async fn state_store_create(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let backend = ctx.adapter.state_store_backend(record);
    let bucket = bucket_name(record);
    let env = ctx
        .adapter
        .cloud_env(TerraformModule::Cloud, record, &ctx.layout)?;

    let created = ctx
        .services
        .state_store
        .create(&backend, &bucket, &env)
        .await?;

    info!(cluster = %record.cluster_name, bucket = %created.details.name, "State store ready");
    Ok(StepOutput {
        state_store_details: Some(created.details),
        state_store_credentials: created.credentials,
        ..Default::default()
    })
}

pub(super) async fn repository_prep(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let layout = ctx.layout.clone();
    let git = ctx.services.git.clone();
    let url = record.gitops_template_url.clone();
    let branch = record.gitops_template_branch.clone();
    let flavor = format!("{}-{}", record.cloud_provider, record.git_provider);
    let cluster_type = record.cluster_type.as_str();

    blocking(move || {
        let templates = layout.templates_dir();
        git.clone_template(&url, &branch, &templates)?;

        let source = templates.join(&flavor);
        if !source.is_dir() {
            return Err(Error::configuration(format!(
                "template {url}@{branch} has no {flavor} directory"
            )));
        }
        replace_dir(&source, &layout.gitops_dir())?;

        let cluster_types = layout.gitops_dir().join("cluster-types");
        let registry = layout.registry_dir();
        if let Some(parent) = registry.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if registry.exists() {
            std::fs::remove_dir_all(&registry)?;
        }
        let cluster_template = cluster_types.join(cluster_type);
        if !cluster_template.is_dir() {
            return Err(Error::configuration(format!(
                "template {url}@{branch} has no {flavor}/cluster-types/{cluster_type} directory"
            )));
        }
        std::fs::rename(&cluster_template, &registry)?;
        std::fs::remove_dir_all(&cluster_types)?;

        let metaphor = templates.join("metaphor");
        if !metaphor.is_dir() {
            return Err(Error::configuration(format!(
                "template {url}@{branch} has no metaphor directory"
            )));
        }
        replace_dir(&metaphor, &layout.metaphor_dir())
    })
    .await?;

    let values = TemplateValues::before_cloud(record);
    for root in [ctx.layout.gitops_dir(), ctx.layout.metaphor_dir()] {
        let detokenizer = ctx.services.detokenizer.clone();
        let values = values.clone();
        let rendered = blocking(move || detokenizer.render_tree(&root, &values)).await?;
        info!(
            cluster = %record.cluster_name,
            root = %rendered.root.display(),
            changed = rendered.files_changed,
            "Repository detokenized"
        );
    }

    Ok(StepOutput::default())
}

/// Replace `dest` with a recursive copy of `source`
fn replace_dir(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    copy_dir(source, dest)
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    let entries = WalkDir::new(source)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ".git"));

    for entry in entries {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            Error::configuration(format!(
                "{} is outside {}",
                entry.path().display(),
                source.display()
            ))
        })?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

pub(super) async fn git_terraform_apply(ctx: &PipelineContext) -> Result<StepOutput> {
    apply_module(ctx, TerraformModule::Git).await?;
    Ok(StepOutput::default())
}

pub(super) async fn repository_push(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let dirs = [ctx.layout.gitops_dir(), ctx.layout.metaphor_dir()];
    for (name, dir) in REPOSITORIES.into_iter().zip(dirs) {
        push_repository(ctx, record, name, dir, COMMIT_MESSAGE).await?;
    }
    Ok(StepOutput::default())
}

async fn push_repository(
    ctx: &PipelineContext,
    record: &ClusterRecord,
    name: &str,
    dir: PathBuf,
    message: &'static str,
) -> Result<()> {
    let git = ctx.services.git.clone();
    let remote = ssh_repo_url(record, name);
    let key = record.git_auth.private_key.clone();
    info!(cluster = %record.cluster_name, remote = %remote, "Pushing repository");
    blocking(move || git.commit_and_push(&dir, &remote, DEFAULT_BRANCH, &key, message)).await
}

pub(super) async fn cloud_terraform_apply(ctx: &PipelineContext) -> Result<StepOutput> {
    apply_module(ctx, TerraformModule::Cloud).await?;

    let record = ctx.reload().await?;
    let env = ctx
        .adapter
        .terraform_env(TerraformModule::Cloud, &record, &ctx.layout)?;
    let outputs = ctx
        .services
        .terraform
        .output(&ctx.terraform_dir(TerraformModule::Cloud), &env)
        .await?;

    let kubeconfig = ctx.adapter.kubeconfig_path(&ctx.layout, &record);
    if let Some(content) = outputs.get("kubeconfig").and_then(|v| v.as_str()) {
        if let Some(parent) = kubeconfig.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&kubeconfig, content).await?;
        debug!(path = %kubeconfig.display(), "Wrote kubeconfig from Terraform output");
    }

    let kms_key_id = outputs
        .get("kms_key_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut rendered = record.clone();
    if let Some(id) = &kms_key_id {
        rendered.kms_key_id = id.clone();
    }
    render_cloud_outputs(ctx, &rendered).await?;

    Ok(StepOutput {
        kms_key_id,
        kubeconfig_path: Some(kubeconfig.to_string_lossy().into_owned()),
        ..Default::default()
    })
}

/// Fill the tokens left open at prep and push gitops again if anything changed
async fn render_cloud_outputs(ctx: &PipelineContext, record: &ClusterRecord) -> Result<()> {
    let detokenizer = ctx.services.detokenizer.clone();
    let values = TemplateValues::from_record(record);
    let root = ctx.layout.gitops_dir();
    let rendered = blocking(move || detokenizer.render_tree(&root, &values)).await?;
    if rendered.files_changed == 0 {
        return Ok(());
    }

    info!(
        cluster = %record.cluster_name,
        changed = rendered.files_changed,
        "Cloud outputs detokenized"
    );
    push_repository(
        ctx,
        record,
        REPOSITORIES[0],
        ctx.layout.gitops_dir(),
        CLOUD_OUTPUTS_COMMIT_MESSAGE,
    )
    .await
}

// =============================================================================
// In-cluster steps
// =============================================================================

pub(super) async fn cluster_secrets_bootstrap(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;

    for namespace in PLATFORM_NAMESPACES {
        kube.ensure_namespace(namespace).await?;
    }

    let api_token = if record.platform_api_token.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        record.platform_api_token.clone()
    };
    let (namespace, name) = INITIAL_SECRETS;
    kube.upsert_secret(
        namespace,
        name,
        BTreeMap::from([("api-token".to_string(), api_token.clone())]),
        BTreeMap::new(),
    )
    .await?;

    kube.upsert_secret(
        ARGOCD_NAMESPACE,
        REPO_CREDS_SECRET,
        BTreeMap::from([
            ("type".to_string(), "git".to_string()),
            (
                "url".to_string(),
                format!("git@{}:{}", record.git_provider.host(), record.git_auth.owner),
            ),
            (
                "sshPrivateKey".to_string(),
                record.git_auth.private_key.clone(),
            ),
        ]),
        BTreeMap::from([(REPO_CREDS_LABEL.0.to_string(), REPO_CREDS_LABEL.1.to_string())]),
    )
    .await?;

    if record.dns_provider == DnsProvider::Cloudflare {
        let cloudflare = record.cloud.cloudflare.as_ref().ok_or_else(|| {
            Error::configuration("dnsProvider is cloudflare but CF_API_TOKEN is not set")
        })?;
        let mut data = BTreeMap::from([("cf-api-token".to_string(), cloudflare.api_token.clone())]);
        if record.use_cloudflare_origin_issuer {
            data.insert(
                "cf-origin-ca-issuer-key".to_string(),
                cloudflare.origin_ca_issuer_key.clone(),
            );
        }
        let (namespace, name) = CLOUDFLARE_SECRET;
        kube.upsert_secret(namespace, name, data.clone(), BTreeMap::new())
            .await?;
        let (namespace, name) = crate::provider::EXTERNAL_DNS_SECRET;
        kube.upsert_secret(namespace, name, data, BTreeMap::new())
            .await?;
    }

    ctx.adapter.bootstrap(kube.as_ref(), record).await?;

    info!(cluster = %record.cluster_name, "Cluster secrets created");
    Ok(StepOutput {
        platform_api_token: Some(api_token),
        ..Default::default()
    })
}

pub(super) async fn argocd_install(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    let kustomization = ctx.layout.registry_dir().join("components").join("argocd");
    kube.apply_kustomize(&kustomization).await?;

    let timeout = ctx.timeouts.deployment();
    kube.wait_for_deployment(ARGOCD_NAMESPACE, "argocd-server", timeout)
        .await?;
    kube.wait_for_deployment(ARGOCD_NAMESPACE, "argocd-repo-server", timeout)
        .await?;
    kube.wait_for_statefulset(ARGOCD_NAMESPACE, "argocd-application-controller", timeout)
        .await?;

    info!(cluster = %record.cluster_name, "ArgoCD installed");
    Ok(StepOutput::default())
}

pub(super) async fn argocd_initialize(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    let password = kube
        .read_secret(ARGOCD_NAMESPACE, ARGOCD_ADMIN_SECRET)
        .await?
        .and_then(|data| data.get("password").cloned())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            Error::kube_op(
                "read secret",
                format!("{ARGOCD_NAMESPACE}/{ARGOCD_ADMIN_SECRET} has no password"),
            )
        })?;

    let forward = kube.port_forward(PortForwardTarget::argocd()).await?;
    let api = ctx.services.argocd.clone();
    let policy = RetryConfig::fixed(ARGOCD_SESSION_ATTEMPTS, ctx.poll_interval);
    let token = retry_with_backoff(&policy, "argocd session", || {
        api.create_session(forward.url(), ARGOCD_ADMIN_USER, &password)
    })
    .await?;

    info!(cluster = %record.cluster_name, "ArgoCD session created");
    Ok(StepOutput {
        argocd_password: Some(password),
        argocd_auth_token: Some(token),
        ..Default::default()
    })
}

pub(super) async fn argocd_create_registry(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    kube.apply_manifest(registry_application(record)).await?;
    info!(cluster = %record.cluster_name, "Registry application created");
    Ok(StepOutput::default())
}

pub(super) async fn vault_initialize(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    let budget = ctx.timeouts.vault();
    kube.wait_for_pod_running(VAULT_NAMESPACE, VAULT_POD, budget)
        .await?;

    let forward = kube.port_forward(PortForwardTarget::vault()).await?;
    let url = forward.url().to_string();
    let vault = ctx.services.vault.clone();

    let auth = if vault.health(&url).await?.initialized {
        existing_vault_auth(kube.as_ref(), record).await?
    } else {
        let init = vault.init(&url, SECRET_SHARES, SECRET_THRESHOLD).await?;
        info!(cluster = %record.cluster_name, shares = SECRET_SHARES, "Vault initialized");
        let auth = VaultAuth {
            root_token: init.root_token,
            unseal_keys: init.keys,
        };
        kube.upsert_secret(
            VAULT_NAMESPACE,
            UNSEAL_SECRET,
            unseal_secret_data(&auth),
            BTreeMap::new(),
        )
        .await?;
        auth
    };

    if vault.health(&url).await?.sealed {
        for key in auth.unseal_keys.iter().take(usize::from(SECRET_THRESHOLD)) {
            if !vault.unseal(&url, key).await? {
                break;
            }
        }
    }

    poll_until(budget, ctx.poll_interval, "vault unseal", || {
        let vault = vault.clone();
        let url = url.clone();
        async move { Ok(!vault.health(&url).await?.sealed) }
    })
    .await?;

    info!(cluster = %record.cluster_name, "Vault initialized and unsealed");
    Ok(StepOutput {
        vault_auth: Some(auth),
        ..Default::default()
    })
}

/// Credentials of an already initialized Vault: the unseal secret first, then the record
async fn existing_vault_auth(kube: &dyn KubeOps, record: &ClusterRecord) -> Result<VaultAuth> {
    let stored = kube
        .read_secret(VAULT_NAMESPACE, UNSEAL_SECRET)
        .await?
        .and_then(|data| vault_auth_from_secret(&data));
    if let Some(auth) = stored {
        debug!(cluster = %record.cluster_name, "Reusing stored Vault credentials");
        return Ok(auth);
    }

    if !record.vault_auth.root_token.is_empty() && !record.vault_auth.unseal_keys.is_empty() {
        return Ok(record.vault_auth.clone());
    }

    Err(Error::configuration(format!(
        "vault in cluster {} is initialized but {VAULT_NAMESPACE}/{UNSEAL_SECRET} is missing",
        record.cluster_name
    )))
}

pub(super) async fn vault_terraform_apply(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    let _forward = kube.port_forward(PortForwardTarget::vault()).await?;
    apply_module(ctx, TerraformModule::Vault).await?;
    Ok(StepOutput::default())
}

pub(super) async fn users_terraform_apply(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    let _forward = kube.port_forward(PortForwardTarget::vault()).await?;
    apply_module(ctx, TerraformModule::Users).await?;
    Ok(StepOutput::default())
}

pub(super) async fn final_check(
    ctx: &PipelineContext,
    record: &ClusterRecord,
) -> Result<StepOutput> {
    let kube = ctx.connect(record).await?;
    kube.wait_for_deployment(ARGOCD_NAMESPACE, "argocd-server", ctx.timeouts.deployment())
        .await?;

    if record.cloud_provider.is_local() {
        debug!(cluster = %record.cluster_name, "Skipping domain liveness for local cluster");
    } else {
        let host = format!("argocd.{}", record.full_domain());
        let probe = ctx.services.probe.clone();
        wait_for_domain(probe.as_ref(), &host, ctx.timeouts.domain_liveness(), ctx.poll_interval)
            .await?;
    }

    info!(cluster = %record.cluster_name, "Cluster provisioned");
    Ok(StepOutput {
        status: Some(ClusterStatus::Provisioned),
        in_progress: Some(false),
        ..Default::default()
    })
}

async fn wait_for_domain(
    probe: &dyn crate::probe::HealthProbe,
    host: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    poll_until(timeout, interval, format!("DNS record {host}"), || async move {
        let resolves = probe.domain_resolves(host).await?;
        if !resolves {
            warn!(host = %host, "Domain does not resolve yet");
        }
        Ok(resolves)
    })
    .await
}
