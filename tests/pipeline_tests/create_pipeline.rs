//! Create pipeline scenarios

use kubefirst::cluster::{ClusterStatus, StepId, StepStatus};
use kubefirst::store::CheckpointStore;
use kubefirst::Error;

use super::fakes::Harness;

// =============================================================================
// Story: fresh cluster
// =============================================================================

/// `demo` on civo/github from an empty store ends provisioned with every
/// checkpoint done and every output captured.
#[tokio::test]
async fn story_fresh_cluster_is_provisioned() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);

    controller.initialize(record).await.unwrap();
    let rec = controller.run_create().await.unwrap();

    for step in StepId::CREATE_ORDER {
        assert!(rec.checkpoints.is_done(step), "{step} not done");
    }
    assert_eq!(rec.status, ClusterStatus::Provisioned);
    assert!(!rec.in_progress);
    assert!(rec.last_condition.is_empty());

    assert!(rec.git_auth.has_keypair());
    assert_eq!(rec.webhook_secret.len(), 32);
    assert_eq!(
        rec.state_store_details.name,
        format!("k1-state-store-demo-{}", rec.cluster_id)
    );
    assert_eq!(rec.kms_key_id, "kms-123");
    assert_eq!(rec.argocd_password, "argo-admin-pw");
    assert_eq!(rec.argocd_auth_token, "argocd-token-1");
    assert_eq!(rec.vault_auth.root_token, "hvs.fake-root-1");
    assert_eq!(rec.vault_auth.unseal_keys.len(), 5);
    assert!(!rec.platform_api_token.is_empty());

    let layout = h.layout();
    assert_eq!(rec.kubeconfig_path, layout.kubeconfig().to_string_lossy());
    assert!(h.read(layout.kubeconfig()).contains("kind: Config"));

    let unseal = h.kube.secret("vault", "vault-unseal-secret").unwrap();
    assert_eq!(unseal["root-token"], "hvs.fake-root-1");
    let initial = h.kube.secret("kubefirst", "kubefirst-initial-secrets").unwrap();
    assert_eq!(initial["api-token"], rec.platform_api_token);
}

#[tokio::test]
async fn story_side_effects_follow_the_create_order() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    controller.run_create().await.unwrap();

    let ev = &h.events;
    let order = [
        "git-api scopes",
        "git clone https://github.com/kubefirst/gitops-template.git@main",
        "terraform apply github",
        "git push git@github.com:acme/gitops.git main",
        "git push git@github.com:acme/metaphor.git main",
        "terraform apply civo",
        "git push git@github.com:acme/gitops.git main",
        "kube namespace argocd",
        "kube kustomize argocd",
        "argocd session",
        "kube apply Application/registry",
        "vault init 5/3",
        "terraform apply vault",
        "terraform apply users",
    ];
    let all = ev.all();
    let mut from = 0;
    for event in order {
        let at = all[from..]
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event} missing after index {from}: {all:?}"));
        from += at + 1;
    }
    assert_eq!(ev.count("git push git@github.com:acme/gitops.git main"), 2);
    assert_eq!(ev.count("vault unseal"), 3);
}

#[tokio::test]
async fn story_repositories_are_detokenized_before_push() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    let rec = controller.run_create().await.unwrap();

    let layout = h.layout();
    let ingress = h.read(layout.registry_dir().join("ingress.yaml"));
    assert_eq!(
        ingress,
        "host: https://argocd.example.com\ncert-manager.io/cluster-issuer: letsencrypt-prod\n"
    );

    let main_tf = h.read(layout.terraform_dir("civo").join("main.tf"));
    assert!(main_tf.starts_with("# demo in nyc1\n"));
    assert!(main_tf.contains(&rec.state_store_details.name));

    let kustomization = h.read(
        layout
            .registry_dir()
            .join("components/argocd/kustomization.yaml"),
    );
    assert!(kustomization.contains("https://github.com/acme/gitops.git"));

    let metaphor = h.read(layout.metaphor_dir().join("README.md"));
    assert_eq!(metaphor, "# metaphor for demo\n");

    assert!(!layout.gitops_dir().join("cluster-types").exists());
    assert!(!layout.gitops_dir().join(".git").exists());
}

/// The KMS key only exists after the cloud apply: the first push carries the
/// token, and a second gitops push carries the captured value.
#[tokio::test]
async fn story_cloud_outputs_reach_the_gitops_repository() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    let rec = controller.run_create().await.unwrap();

    assert_eq!(rec.kms_key_id, "kms-123");
    let vault = h.read(h.layout().registry_dir().join("vault.yaml"));
    assert_eq!(vault, "seal: demo\nkmsKeyId: kms-123\n");

    let pushes: Vec<_> = h
        .events
        .all()
        .into_iter()
        .enumerate()
        .filter(|(_, e)| e == "git push git@github.com:acme/gitops.git main")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[0] < h.events.position("terraform apply civo"));
    assert!(pushes[1] > h.events.position("terraform apply civo"));
}

#[tokio::test]
async fn vault_modules_see_the_root_token_from_vault_init() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    controller.run_create().await.unwrap();

    for module in ["vault", "users"] {
        let envs = h.terraform.envs_for(module);
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0]["VAULT_TOKEN"], "hvs.fake-root-1");
        assert_eq!(envs[0]["VAULT_ADDR"], "http://127.0.0.1:8200");
    }
}

// =============================================================================
// Story: reruns and resumes
// =============================================================================

#[tokio::test]
async fn story_second_run_performs_no_side_effects() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record.clone()).await.unwrap();
    let first = controller.run_create().await.unwrap();

    h.events.clear();
    controller.initialize(record).await.unwrap();
    let second = controller.run_create().await.unwrap();

    assert!(h.events.all().is_empty(), "unexpected: {:?}", h.events.all());
    assert_eq!(second.cluster_id, first.cluster_id);
    assert_eq!(second.git_auth.public_key, first.git_auth.public_key);
    assert_eq!(second.status, ClusterStatus::Provisioned);
}

/// Only `GitTerraformApply` is pending: it runs, everything else is skipped
#[tokio::test]
async fn story_resume_runs_only_the_pending_step() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    controller.run_create().await.unwrap();

    let mut rec = h.store.get_cluster("demo").await.unwrap();
    rec.checkpoints
        .set(StepId::GitTerraformApply, StepStatus::Pending);
    h.store.delete_cluster("demo").await.unwrap();
    h.store.insert_cluster(&rec).await.unwrap();
    h.events.clear();

    let rec = controller.run_create().await.unwrap();

    assert_eq!(h.events.all(), vec!["terraform apply github".to_string()]);
    assert!(rec.checkpoints.is_done(StepId::GitTerraformApply));
}

#[tokio::test]
async fn story_failed_run_resumes_at_the_failed_step() {
    let h = Harness::new();
    h.terraform.fail("civo", 2);
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record.clone()).await.unwrap();

    controller.run_create().await.unwrap_err();
    let clones = h.events.count_prefix("git clone");
    h.events.clear();

    controller.initialize(record).await.unwrap();
    let rec = controller.run_create().await.unwrap();

    assert_eq!(clones, 1);
    assert_eq!(h.events.count_prefix("git clone"), 0);
    assert_eq!(h.events.count("git push git@github.com:acme/metaphor.git main"), 0);
    assert_eq!(h.events.count("git push git@github.com:acme/gitops.git main"), 1);
    assert_eq!(h.events.count("terraform apply civo"), 1);
    assert_eq!(rec.status, ClusterStatus::Provisioned);
}

// =============================================================================
// Story: Terraform retry bound
// =============================================================================

#[tokio::test]
async fn story_two_terraform_failures_fail_the_step() {
    let h = Harness::new();
    h.terraform.fail("civo", 2);
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();

    let err = controller.run_create().await.unwrap_err();
    assert!(matches!(err, Error::Step { .. }));
    assert!(err.to_string().contains("CloudTerraformApplyCheck"));
    assert_eq!(h.events.count("terraform apply civo"), 2);

    let rec = h.store.get_cluster("demo").await.unwrap();
    assert_eq!(
        rec.checkpoints.get(StepId::CloudTerraformApply),
        StepStatus::Failed
    );
    assert!(rec.checkpoints.is_done(StepId::RepositoryPush));
    assert!(!rec.checkpoints.attempted(StepId::ClusterSecretsBootstrap));
    assert_eq!(rec.status, ClusterStatus::Error);
    assert!(!rec.in_progress);
    assert!(rec.last_condition.contains("fake provider failure"));
}

#[tokio::test]
async fn story_one_terraform_failure_is_retried() {
    let h = Harness::new();
    h.terraform.fail("github", 1);
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();

    let rec = controller.run_create().await.unwrap();
    assert_eq!(h.events.count("terraform apply github"), 2);
    assert!(rec.checkpoints.is_done(StepId::GitTerraformApply));
}

// =============================================================================
// Story: git preflight
// =============================================================================

#[tokio::test]
async fn existing_gitops_repository_stops_the_run_at_git_init() {
    let h = Harness::new();
    h.git_api
        .existing
        .lock()
        .unwrap()
        .insert("gitops".to_string());
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();

    let err = controller.run_create().await.unwrap_err();
    assert!(err.to_string().contains("GitInitCheck"));
    assert!(err.report().contains("acme/gitops already exists"));
    assert_eq!(h.events.count_prefix("git clone"), 0);
    assert_eq!(h.events.count_prefix("terraform"), 0);
}
