//! In-memory fakes for every external system the pipeline touches
//!
//! All fakes append to a shared [`Events`] log so tests can assert on the
//! order of side effects across systems.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use kubefirst::argocd::ArgoCdApi;
use kubefirst::cluster::{
    CivoAuth, CloudCredentials, ClusterRecord, StateStoreCredentials, StateStoreDetails,
};
use kubefirst::config::{ClusterDefinition, Layout, Timeouts};
use kubefirst::controller::{ClusterController, PipelineContext};
use kubefirst::detokenize::LiteralDetokenizer;
use kubefirst::git::{GitOps, GitProviderApi};
use kubefirst::k8s::{KubeConnector, KubeOps, PortForward, PortForwardTarget};
use kubefirst::probe::HealthProbe;
use kubefirst::provider::create_adapter;
use kubefirst::state_store::{StateStoreBackend, StateStoreOutput, StateStoreProvisioner};
use kubefirst::store::{CheckpointStore, MemoryStore};
use kubefirst::terraform::{EnvMap, TerraformRunner};
use kubefirst::vault::{VaultApi, VaultHealth, VaultInit};
use kubefirst::{Error, Result};

// =============================================================================
// Event log
// =============================================================================

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.all().iter().filter(|e| *e == event).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> usize {
        self.all()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {event:?} not recorded in {:?}", self.all()))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

// =============================================================================
// Terraform
// =============================================================================

pub struct FakeTerraform {
    events: Events,
    failures: Mutex<BTreeMap<String, u32>>,
    envs: Mutex<Vec<(String, EnvMap)>>,
    cluster: FakeCluster,
}

/// In-cluster systems that vanish with the cloud module
#[derive(Clone)]
struct FakeCluster {
    kube: Arc<FakeKube>,
    argocd: Arc<FakeArgoCd>,
    vault: Arc<FakeVault>,
}

impl FakeCluster {
    fn wipe(&self) {
        self.kube.reset();
        self.argocd.expire_sessions();
        let mut vault = self.vault.state.lock().unwrap();
        *vault = VaultState {
            inits: vault.inits,
            ..Default::default()
        };
    }
}

impl FakeTerraform {
    fn new(events: Events, cluster: FakeCluster) -> Self {
        Self {
            events,
            failures: Mutex::new(BTreeMap::new()),
            envs: Mutex::new(Vec::new()),
            cluster,
        }
    }

    /// Make the next `times` applies or destroys of `module` fail
    pub fn fail(&self, module: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(module.to_string(), times);
    }

    /// Environments passed to `module`, in call order
    pub fn envs_for(&self, module: &str) -> Vec<EnvMap> {
        self.envs
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == module)
            .map(|(_, env)| env.clone())
            .collect()
    }

    fn invoke(&self, action: &str, dir: &Path, env: &EnvMap) -> Result<()> {
        let module = module_of(dir);
        self.events.push(format!("terraform {action} {module}"));
        self.envs.lock().unwrap().push((module.clone(), env.clone()));

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&module) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::terraform(module, "Error: fake provider failure"));
            }
        }
        if action == "destroy" && module == "civo" {
            self.cluster.wipe();
        }
        Ok(())
    }
}

fn module_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl TerraformRunner for FakeTerraform {
    async fn apply(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.invoke("apply", dir, env)
    }

    async fn destroy(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.invoke("destroy", dir, env)
    }

    async fn output(&self, dir: &Path, _env: &EnvMap) -> Result<BTreeMap<String, serde_json::Value>> {
        if module_of(dir) != "civo" {
            return Ok(BTreeMap::new());
        }
        Ok(BTreeMap::from([
            ("kms_key_id".to_string(), serde_json::json!("kms-123")),
            (
                "kubeconfig".to_string(),
                serde_json::json!("apiVersion: v1\nkind: Config\n"),
            ),
        ]))
    }
}

// =============================================================================
// Kubernetes
// =============================================================================

pub struct FakeKube {
    events: Events,
    secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, String>>>,
}

impl FakeKube {
    fn new(events: Events) -> Self {
        Self {
            events,
            secrets: Mutex::new(Self::initial_secrets()),
        }
    }

    /// What a freshly installed ArgoCD leaves behind
    fn initial_secrets() -> BTreeMap<(String, String), BTreeMap<String, String>> {
        BTreeMap::from([(
            ("argocd".to_string(), "argocd-initial-admin-secret".to_string()),
            BTreeMap::from([("password".to_string(), "argo-admin-pw".to_string())]),
        )])
    }

    fn reset(&self) {
        *self.secrets.lock().unwrap() = Self::initial_secrets();
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl KubeOps for FakeKube {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        self.events.push(format!("kube namespace {name}"));
        Ok(())
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        _labels: BTreeMap<String, String>,
    ) -> Result<()> {
        self.events.push(format!("kube secret {namespace}/{name}"));
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.secret(namespace, name))
    }

    async fn wait_for_deployment(&self, namespace: &str, name: &str, _timeout: Duration) -> Result<()> {
        self.events.push(format!("kube wait {namespace}/{name}"));
        Ok(())
    }

    async fn wait_for_statefulset(&self, namespace: &str, name: &str, _timeout: Duration) -> Result<()> {
        self.events.push(format!("kube wait {namespace}/{name}"));
        Ok(())
    }

    async fn wait_for_pod_running(&self, namespace: &str, name: &str, _timeout: Duration) -> Result<()> {
        self.events.push(format!("kube wait {namespace}/{name}"));
        Ok(())
    }

    async fn apply_manifest(&self, manifest: serde_json::Value) -> Result<()> {
        let kind = manifest["kind"].as_str().unwrap_or_default();
        let name = manifest["metadata"]["name"].as_str().unwrap_or_default();
        self.events.push(format!("kube apply {kind}/{name}"));
        Ok(())
    }

    async fn apply_kustomize(&self, dir: &Path) -> Result<()> {
        if !dir.join("kustomization.yaml").exists() {
            return Err(Error::kube_op("kustomize", format!("{} not found", dir.display())));
        }
        self.events.push("kube kustomize argocd");
        Ok(())
    }

    async fn delete_persistent_volume_claims(&self) -> Result<usize> {
        self.events.push("kube delete pvcs");
        Ok(3)
    }

    async fn wait_for_volumes_released(&self, _timeout: Duration) -> Result<()> {
        self.events.push("kube volumes released");
        Ok(())
    }

    async fn port_forward(&self, target: PortForwardTarget) -> Result<PortForward> {
        self.events.push(format!("kube port-forward {}", target.namespace));
        Ok(PortForward::detached(target.local_url()))
    }
}

pub struct FakeConnector(pub Arc<FakeKube>);

#[async_trait]
impl KubeConnector for FakeConnector {
    async fn connect(&self, _kubeconfig: &Path) -> Result<Arc<dyn KubeOps>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Git
// =============================================================================

pub struct FakeGit {
    events: Events,
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Lay out a minimal gitops template for civo/github
pub fn write_template(dest: &Path) {
    let flavor = dest.join("civo-github");
    for module in ["civo", "github", "vault", "users"] {
        write(
            &flavor.join("terraform").join(module).join("main.tf"),
            "# <CLUSTER_NAME> in <CLOUD_REGION>\nbucket = \"<KUBEFIRST_STATE_STORE_BUCKET>\"\n",
        );
    }
    write(
        &flavor.join("cluster-types/mgmt/components/argocd/kustomization.yaml"),
        "resources:\n  - <GITOPS_REPO_URL>\n",
    );
    write(
        &flavor.join("cluster-types/mgmt/ingress.yaml"),
        "host: <ARGOCD_INGRESS_URL>\n<CERT_MANAGER_ISSUER_ANNOTATION_1>\n",
    );
    write(
        &flavor.join("cluster-types/mgmt/vault.yaml"),
        "seal: <CLUSTER_NAME>\nkmsKeyId: <KMS_KEY_ID>\n",
    );
    write(&flavor.join("cluster-types/workload/README.md"), "workload");
    write(&dest.join("metaphor/README.md"), "# metaphor for <CLUSTER_NAME>\n");
    write(&dest.join(".git/HEAD"), "ref: refs/heads/main\n");
}

impl GitOps for FakeGit {
    fn clone_template(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        self.events.push(format!("git clone {url}@{branch}"));
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        write_template(dest);
        Ok(())
    }

    fn commit_and_push(
        &self,
        repo_dir: &Path,
        remote_url: &str,
        branch: &str,
        _private_key: &str,
        _message: &str,
    ) -> Result<()> {
        assert!(repo_dir.is_dir(), "{} was not prepared", repo_dir.display());
        self.events.push(format!("git push {remote_url} {branch}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGitApi {
    events: Events,
    pub existing: Mutex<BTreeSet<String>>,
}

#[async_trait]
impl GitProviderApi for FakeGitApi {
    async fn verify_token_scopes(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(Error::configuration("empty token"));
        }
        self.events.push("git-api scopes");
        Ok(())
    }

    async fn repository_exists(&self, _owner: &str, _token: &str, name: &str) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(name))
    }

    async fn delete_user_ssh_key(&self, _token: &str, title: &str) -> Result<()> {
        self.events.push(format!("git-api delete-key {title}"));
        Ok(())
    }
}

// =============================================================================
// ArgoCD and Vault
// =============================================================================

pub struct FakeArgoCd {
    events: Events,
    apps: Mutex<BTreeSet<String>>,
    issued: Mutex<u32>,
    sessions: Mutex<BTreeSet<String>>,
}

impl FakeArgoCd {
    /// Invalidate every session token handed out so far
    pub fn expire_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }

    fn authorize(&self, token: &str) -> Result<()> {
        if self.sessions.lock().unwrap().contains(token) {
            Ok(())
        } else {
            Err(Error::http("argocd", "401 Unauthorized: invalid session"))
        }
    }
}

#[async_trait]
impl ArgoCdApi for FakeArgoCd {
    async fn create_session(&self, _base_url: &str, username: &str, password: &str) -> Result<String> {
        assert_eq!((username, password), ("admin", "argo-admin-pw"));
        self.events.push("argocd session");
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        let token = format!("argocd-token-{issued}");
        self.sessions.lock().unwrap().insert(token.clone());
        Ok(token)
    }

    async fn delete_application(
        &self,
        _base_url: &str,
        token: &str,
        name: &str,
        cascade: bool,
    ) -> Result<()> {
        self.authorize(token)?;
        self.events.push(format!("argocd delete {name} cascade={cascade}"));
        self.apps.lock().unwrap().remove(name);
        Ok(())
    }

    async fn application_exists(&self, _base_url: &str, token: &str, name: &str) -> Result<bool> {
        self.authorize(token)?;
        Ok(self.apps.lock().unwrap().contains(name))
    }
}

#[derive(Default)]
struct VaultState {
    initialized: bool,
    keys_submitted: usize,
    inits: u32,
}

pub struct FakeVault {
    events: Events,
    state: Mutex<VaultState>,
}

#[async_trait]
impl VaultApi for FakeVault {
    async fn health(&self, _base_url: &str) -> Result<VaultHealth> {
        let state = self.state.lock().unwrap();
        Ok(VaultHealth {
            initialized: state.initialized,
            sealed: state.keys_submitted < 3,
        })
    }

    async fn init(&self, _base_url: &str, shares: u8, threshold: u8) -> Result<VaultInit> {
        self.events.push(format!("vault init {shares}/{threshold}"));
        let mut state = self.state.lock().unwrap();
        assert!(!state.initialized, "vault initialized twice");
        state.initialized = true;
        state.inits += 1;
        Ok(VaultInit {
            keys: (1..=shares).map(|i| format!("unseal-{i}")).collect(),
            root_token: format!("hvs.fake-root-{}", state.inits),
        })
    }

    async fn unseal(&self, _base_url: &str, _key: &str) -> Result<bool> {
        self.events.push("vault unseal");
        let mut state = self.state.lock().unwrap();
        state.keys_submitted += 1;
        Ok(state.keys_submitted < 3)
    }
}

// =============================================================================
// State store and DNS
// =============================================================================

pub struct FakeStateStore {
    events: Events,
}

#[async_trait]
impl StateStoreProvisioner for FakeStateStore {
    async fn create(
        &self,
        backend: &StateStoreBackend,
        bucket: &str,
        env: &EnvMap,
    ) -> Result<StateStoreOutput> {
        assert_eq!(env["AWS_ACCESS_KEY_ID"], "state-key");
        let hostname = match backend {
            StateStoreBackend::S3Compatible {
                endpoint: Some(endpoint),
                ..
            } => endpoint.clone(),
            _ => String::new(),
        };
        self.events.push(format!("state-store create {bucket}"));
        Ok(StateStoreOutput {
            details: StateStoreDetails {
                name: bucket.to_string(),
                id: bucket.to_string(),
                hostname,
            },
            credentials: None,
        })
    }
}

pub struct FakeProbe;

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn domain_resolves(&self, _host: &str) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub home: TempDir,
    pub events: Events,
    pub store: MemoryStore,
    pub terraform: Arc<FakeTerraform>,
    pub kube: Arc<FakeKube>,
    pub git_api: Arc<FakeGitApi>,
    pub argocd: Arc<FakeArgoCd>,
    git: Arc<FakeGit>,
    vault: Arc<FakeVault>,
}

impl Harness {
    pub fn new() -> Self {
        let events = Events::default();
        let cluster = FakeCluster {
            kube: Arc::new(FakeKube::new(events.clone())),
            argocd: Arc::new(FakeArgoCd {
                events: events.clone(),
                apps: Mutex::new(BTreeSet::from(["registry".to_string()])),
                issued: Mutex::new(0),
                sessions: Mutex::new(BTreeSet::new()),
            }),
            vault: Arc::new(FakeVault {
                events: events.clone(),
                state: Mutex::new(VaultState::default()),
            }),
        };
        Self {
            home: tempfile::tempdir().unwrap(),
            store: MemoryStore::new(),
            terraform: Arc::new(FakeTerraform::new(events.clone(), cluster.clone())),
            kube: cluster.kube,
            argocd: cluster.argocd,
            vault: cluster.vault,
            git_api: Arc::new(FakeGitApi {
                events: events.clone(),
                ..Default::default()
            }),
            git: Arc::new(FakeGit {
                events: events.clone(),
            }),
            events,
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.home.path(), "demo")
    }

    /// Fresh `demo` record on civo/github
    pub fn record(&self) -> ClusterRecord {
        let definition = ClusterDefinition {
            cluster_name: "demo".into(),
            cloud_provider: "civo".into(),
            git_provider: "github".into(),
            git_owner: "acme".into(),
            cloud_region: "nyc1".into(),
            domain_name: "example.com".into(),
            alerts_email: "ops@example.com".into(),
            ..Default::default()
        };
        let cloud = CloudCredentials {
            civo: Some(CivoAuth {
                token: "civo-token".into(),
            }),
            ..Default::default()
        };
        let mut record = definition.to_record("ghp_token", cloud).unwrap();
        record.state_store_credentials = StateStoreCredentials {
            access_key_id: "state-key".into(),
            secret_access_key: "state-secret".into(),
            session_token: String::new(),
        };
        record
    }

    pub fn controller(&self, record: &ClusterRecord) -> ClusterController {
        let adapter = create_adapter(
            record.cloud_provider.as_str(),
            record.git_provider.as_str(),
            record,
        )
        .unwrap();
        let store: Arc<dyn CheckpointStore> = Arc::new(self.store.clone());
        let ctx = PipelineContext::builder("demo", adapter, self.layout(), store)
            .timeouts(Timeouts {
                terraform_retry_secs: 0,
                ..Default::default()
            })
            .poll_interval(Duration::from_millis(1))
            .terraform(self.terraform.clone())
            .kube_connector(Arc::new(FakeConnector(self.kube.clone())))
            .git(self.git.clone())
            .git_api(self.git_api.clone())
            .argocd(self.argocd.clone())
            .vault(self.vault.clone())
            .detokenizer(Arc::new(LiteralDetokenizer))
            .state_store(Arc::new(FakeStateStore {
                events: self.events.clone(),
            }))
            .probe(Arc::new(FakeProbe))
            .build()
            .unwrap();
        ClusterController::new(ctx)
    }

    pub fn read(&self, path: PathBuf) -> String {
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
    }
}
