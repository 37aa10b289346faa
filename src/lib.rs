//! Kubefirst - checkpointed, resumable provisioner for GitOps management clusters
//!
//! A create run takes a cluster definition through a fixed pipeline: git
//! preflight, bot credentials, state store, repository preparation,
//! Terraform for the git provider and the cloud, in-cluster bootstrap of
//! ArgoCD and Vault, and a final liveness check. Every step is gated on a
//! persisted checkpoint so an interrupted run resumes where it stopped.
//!
//! # Modules
//!
//! - [`cluster`] - Cluster record, checkpoints and patches
//! - [`store`] - Checkpoint stores (file, Kubernetes Secret, memory)
//! - [`controller`] - Step executor and the create/destroy pipelines
//! - [`provider`] - Cloud provider adapters and Terraform environments
//! - [`terraform`] - Terraform runner and apply-with-retry
//! - [`detokenize`] - Template token rendering
//! - [`git`] - Local git and git provider APIs
//! - [`k8s`] - Operations against the provisioned cluster
//! - [`argocd`], [`vault`] - Platform service clients
//! - [`state_store`] - Terraform backend bucket creation
//! - [`commands`] - CLI command implementations
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod argocd;
pub mod cluster;
pub mod command;
pub mod commands;
pub mod config;
pub mod controller;
pub mod detokenize;
pub mod error;
pub mod git;
pub mod k8s;
pub mod probe;
pub mod provider;
pub mod retry;
pub mod ssh;
pub mod state_store;
pub mod store;
pub mod telemetry;
pub mod terraform;
pub mod vault;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "kubefirst";
