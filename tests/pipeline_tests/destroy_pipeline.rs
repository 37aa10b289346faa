//! Destroy pipeline scenarios

use kubefirst::cluster::{ClusterStatus, StepId, StepStatus};
use kubefirst::controller::ClusterController;
use kubefirst::store::CheckpointStore;

use super::fakes::Harness;

async fn provisioned(h: &Harness) -> ClusterController {
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();
    controller.run_create().await.unwrap();
    h.events.clear();
    controller
}

// =============================================================================
// Story: full teardown
// =============================================================================

#[tokio::test]
async fn story_destroy_removes_resources_in_dependency_order() {
    let h = Harness::new();
    let controller = provisioned(&h).await;

    let rec = controller.run_destroy().await.unwrap();

    let ev = &h.events;
    let order = [
        "argocd delete registry cascade=true",
        "kube delete pvcs",
        "kube volumes released",
        "terraform destroy github",
        "terraform destroy civo",
        "git-api delete-key kbot-ssh-key",
    ];
    for pair in order.windows(2) {
        assert!(
            ev.position(pair[0]) < ev.position(pair[1]),
            "{} should happen before {}",
            pair[0],
            pair[1]
        );
    }
    assert!(ev.position("argocd session") < ev.position("argocd delete registry cascade=true"));
    assert_eq!(ev.count_prefix("terraform destroy vault"), 0);

    assert_eq!(rec.status, ClusterStatus::Deleted);
    assert!(!rec.in_progress);
}

/// Destroy long after create: the session token from create time has expired
#[tokio::test]
async fn story_expired_argocd_session_is_replaced_on_destroy() {
    let h = Harness::new();
    let controller = provisioned(&h).await;
    let stale = h.store.get_cluster("demo").await.unwrap().argocd_auth_token;
    assert!(!stale.is_empty());
    h.argocd.expire_sessions();

    let rec = controller.run_destroy().await.unwrap();

    assert_eq!(h.events.count("argocd session"), 1);
    assert_eq!(h.events.count("argocd delete registry cascade=true"), 1);
    assert_eq!(
        rec.checkpoints.get(StepId::ArgoCDCreateRegistry),
        StepStatus::Pending
    );
    assert_eq!(rec.status, ClusterStatus::Deleted);
}

#[tokio::test]
async fn destroy_resets_what_it_removed_and_keeps_identity() {
    let h = Harness::new();
    let controller = provisioned(&h).await;
    let before = h.store.get_cluster("demo").await.unwrap();

    let rec = controller.run_destroy().await.unwrap();

    let cleared = [
        StepId::RepositoryPrep,
        StepId::GitTerraformApply,
        StepId::RepositoryPush,
        StepId::CloudTerraformApply,
    ];
    for step in cleared.into_iter().chain(StepId::IN_CLUSTER) {
        assert_eq!(rec.checkpoints.get(step), StepStatus::Pending, "{step}");
    }
    for step in [
        StepId::GitInit,
        StepId::KbotSetup,
        StepId::StateStoreCreate,
    ] {
        assert!(rec.checkpoints.is_done(step), "{step}");
    }
    assert_eq!(rec.cluster_id, before.cluster_id);
    assert_eq!(rec.git_auth.private_key, before.git_auth.private_key);
    assert_eq!(rec.webhook_secret, before.webhook_secret);
}

#[tokio::test]
async fn destroy_of_a_record_that_never_ran_only_marks_it_deleted() {
    let h = Harness::new();
    let record = h.record();
    let controller = h.controller(&record);
    controller.initialize(record).await.unwrap();

    let rec = controller.run_destroy().await.unwrap();

    assert!(h.events.all().is_empty(), "unexpected: {:?}", h.events.all());
    assert_eq!(rec.status, ClusterStatus::Deleted);
}

// =============================================================================
// Story: interrupted teardown
// =============================================================================

/// The cloud module fails twice; the rerun skips everything already removed
#[tokio::test]
async fn story_failed_destroy_resumes_where_it_stopped() {
    let h = Harness::new();
    let controller = provisioned(&h).await;
    h.terraform.fail("civo", 2);

    let err = controller.run_destroy().await.unwrap_err();
    assert!(err.to_string().contains("CloudTerraformDestroy"));

    let rec = h.store.get_cluster("demo").await.unwrap();
    assert_eq!(rec.status, ClusterStatus::Error);
    assert!(!rec.in_progress);
    assert_eq!(
        rec.checkpoints.get(StepId::ArgoCDCreateRegistry),
        StepStatus::Pending
    );
    assert_eq!(
        rec.checkpoints.get(StepId::GitTerraformApply),
        StepStatus::Pending
    );
    assert!(rec.checkpoints.is_done(StepId::CloudTerraformApply));
    assert_eq!(h.events.count_prefix("git-api delete-key"), 0);

    h.events.clear();
    let rec = controller.run_destroy().await.unwrap();

    assert_eq!(h.events.count_prefix("argocd delete"), 0);
    assert_eq!(h.events.count("terraform destroy github"), 0);
    assert_eq!(h.events.count("kube delete pvcs"), 1);
    assert_eq!(h.events.count("terraform destroy civo"), 1);
    assert_eq!(h.events.count("git-api delete-key kbot-ssh-key"), 1);
    assert_eq!(rec.status, ClusterStatus::Deleted);
}

// =============================================================================
// Story: recreate after destroy
// =============================================================================

#[tokio::test]
async fn story_recreate_reruns_only_the_cleared_steps() {
    let h = Harness::new();
    let controller = provisioned(&h).await;
    let first = h.store.get_cluster("demo").await.unwrap();
    controller.run_destroy().await.unwrap();
    h.events.clear();

    controller.initialize(h.record()).await.unwrap();
    let rec = controller.run_create().await.unwrap();

    assert_eq!(h.events.count_prefix("git-api scopes"), 0);
    assert_eq!(h.events.count_prefix("state-store create"), 0);
    assert_eq!(h.events.count_prefix("git clone"), 1);
    assert_eq!(h.events.count("git push git@github.com:acme/gitops.git main"), 2);
    assert_eq!(h.events.count("git push git@github.com:acme/metaphor.git main"), 1);
    assert_eq!(h.events.count("terraform apply github"), 1);
    assert_eq!(h.events.count("terraform apply civo"), 1);
    assert_eq!(h.events.count("vault init 5/3"), 1);

    assert_eq!(rec.status, ClusterStatus::Provisioned);
    assert_eq!(rec.cluster_id, first.cluster_id);
    assert_eq!(rec.git_auth.public_key, first.git_auth.public_key);

    // The new cluster's Vault was initialized, so the old root token is gone
    assert_ne!(rec.vault_auth.root_token, first.vault_auth.root_token);
    assert_eq!(rec.vault_auth.root_token, "hvs.fake-root-2");
    let unseal = h.kube.secret("vault", "vault-unseal-secret").unwrap();
    assert_eq!(unseal["root-token"], "hvs.fake-root-2");
}
