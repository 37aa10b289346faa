//! Token values derived from a cluster record

use std::collections::BTreeMap;

use crate::cluster::{ClusterRecord, DnsProvider};

/// Every token the templates may contain
pub const TOKENS: [&str; 25] = [
    "<CLUSTER_NAME>",
    "<CLUSTER_ID>",
    "<CLUSTER_TYPE>",
    "<CLOUD_PROVIDER>",
    "<CLOUD_REGION>",
    "<DOMAIN_NAME>",
    "<ALERTS_EMAIL>",
    "<GIT_PROVIDER>",
    "<GIT_OWNER>",
    "<GIT_FQDN>",
    "<GITOPS_REPO_URL>",
    "<METAPHOR_REPO_URL>",
    "<ARGOCD_INGRESS_URL>",
    "<ARGO_WORKFLOWS_INGRESS_URL>",
    "<VAULT_INGRESS_URL>",
    "<ATLANTIS_INGRESS_URL>",
    "<ATLANTIS_WEBHOOK_URL>",
    "<KUBEFIRST_STATE_STORE_BUCKET>",
    "<KMS_KEY_ID>",
    "<EXTERNAL_DNS_PROVIDER_NAME>",
    "<CONTAINER_REGISTRY_URL>",
    "<CERT_MANAGER_ISSUER_ANNOTATION_1>",
    "<CERT_MANAGER_ISSUER_ANNOTATION_2>",
    "<CERT_MANAGER_ISSUER_ANNOTATION_3>",
    "<CERT_MANAGER_ISSUER_ANNOTATION_4>",
];

/// Tokens whose values only exist once the cloud module has been applied
pub const POST_CLOUD_TOKENS: [&str; 1] = ["<KMS_KEY_ID>"];

/// Token to replacement map
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateValues {
    tokens: BTreeMap<&'static str, String>,
}

impl TemplateValues {
    /// Values for every token in [`TOKENS`]
    pub fn from_record(record: &ClusterRecord) -> Self {
        let git = record.git_provider;
        let owner = &record.git_auth.owner;
        let protocol = record.git_protocol;

        let external_dns = match record.dns_provider {
            DnsProvider::Cloudflare => "cloudflare".to_string(),
            DnsProvider::Cloud => record.cloud_provider.external_dns_provider().to_string(),
        };
        let [a1, a2, a3, a4] = issuer_annotations(record.use_cloudflare_origin_issuer);

        let tokens = BTreeMap::from([
            ("<CLUSTER_NAME>", record.cluster_name.clone()),
            ("<CLUSTER_ID>", record.cluster_id.clone()),
            ("<CLUSTER_TYPE>", record.cluster_type.as_str().to_string()),
            ("<CLOUD_PROVIDER>", record.cloud_provider.to_string()),
            ("<CLOUD_REGION>", record.cloud_region.clone()),
            ("<DOMAIN_NAME>", record.full_domain()),
            ("<ALERTS_EMAIL>", record.alerts_email.clone()),
            ("<GIT_PROVIDER>", git.to_string()),
            ("<GIT_OWNER>", owner.clone()),
            ("<GIT_FQDN>", git.fqdn(protocol)),
            ("<GITOPS_REPO_URL>", git.repo_url(protocol, owner, "gitops")),
            (
                "<METAPHOR_REPO_URL>",
                git.repo_url(protocol, owner, "metaphor"),
            ),
            ("<ARGOCD_INGRESS_URL>", record.ingress_url("argocd")),
            ("<ARGO_WORKFLOWS_INGRESS_URL>", record.ingress_url("argo")),
            ("<VAULT_INGRESS_URL>", record.ingress_url("vault")),
            ("<ATLANTIS_INGRESS_URL>", record.ingress_url("atlantis")),
            (
                "<ATLANTIS_WEBHOOK_URL>",
                crate::provider::atlantis_webhook_url(record),
            ),
            (
                "<KUBEFIRST_STATE_STORE_BUCKET>",
                record.state_store_details.name.clone(),
            ),
            ("<KMS_KEY_ID>", record.kms_key_id.clone()),
            ("<EXTERNAL_DNS_PROVIDER_NAME>", external_dns),
            ("<CONTAINER_REGISTRY_URL>", git.container_registry(owner)),
            ("<CERT_MANAGER_ISSUER_ANNOTATION_1>", a1),
            ("<CERT_MANAGER_ISSUER_ANNOTATION_2>", a2),
            ("<CERT_MANAGER_ISSUER_ANNOTATION_3>", a3),
            ("<CERT_MANAGER_ISSUER_ANNOTATION_4>", a4),
        ]);
        Self { tokens }
    }

    /// Values known before any cloud resource exists.
    ///
    /// [`POST_CLOUD_TOKENS`] are left out, so rendering leaves them in place
    /// for the pass that runs after the cloud apply.
    pub fn before_cloud(record: &ClusterRecord) -> Self {
        let mut values = Self::from_record(record);
        for token in POST_CLOUD_TOKENS {
            values.tokens.remove(token);
        }
        values
    }

    /// All token/value pairs
    pub fn tokens(&self) -> &BTreeMap<&'static str, String> {
        &self.tokens
    }

    /// Value of one token
    pub fn get(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    /// Replace every token occurrence in `content`
    pub fn render(&self, content: &str) -> String {
        let mut out = content.to_string();
        for (token, value) in &self.tokens {
            if out.contains(token) {
                out = out.replace(token, value);
            }
        }
        out
    }
}

fn issuer_annotations(cloudflare_origin: bool) -> [String; 4] {
    if cloudflare_origin {
        [
            "cert-manager.io/issuer: cloudflare-origin-issuer".into(),
            "cert-manager.io/issuer-kind: OriginIssuer".into(),
            "cert-manager.io/issuer-group: cert-manager.k8s.cloudflare.com".into(),
            String::new(),
        ]
    } else {
        [
            "cert-manager.io/cluster-issuer: letsencrypt-prod".into(),
            String::new(),
            String::new(),
            String::new(),
        ]
    }
}
