//! Pipeline scenarios
//!
//! - `fakes`: in-memory stand-ins for Terraform, Kubernetes, git, ArgoCD and Vault
//! - `create_pipeline`: fresh runs, reruns, resumes and the Terraform retry bound
//! - `destroy_pipeline`: teardown order and checkpoint clearing
//! - `dispatch`: provider adapter selection

mod create_pipeline;
mod destroy_pipeline;
mod dispatch;
mod fakes;
