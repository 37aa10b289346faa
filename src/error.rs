//! Error types for the provisioner

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Unsupported provider combination, missing token, scope or env key
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cluster record does not exist in the checkpoint store
    #[error("cluster not found: {0}")]
    NotFound(String),

    /// Checkpoint store could not be reached or written
    #[error("checkpoint store error: {0}")]
    Store(String),

    /// Serialization/deserialization error (including undecodable records)
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Terraform invocation failed
    #[error("terraform {module} failed: {message}")]
    Terraform {
        /// Root module directory name
        module: String,
        /// stderr of the failing invocation
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubernetes operation failed outside of the raw API call
    #[error("kubernetes {operation} failed: {message}")]
    KubeOperation {
        /// Operation that failed
        operation: String,
        /// Error message
        message: String,
    },

    /// HTTP call to ArgoCD, Vault or a git provider failed
    #[error("{service} request failed: {message}")]
    Http {
        /// Remote service name
        service: String,
        /// Error message
        message: String,
    },

    /// Local git operation failed
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// External command failed
    #[error("command failed: {command} - {message}")]
    Command {
        /// The command that failed
        command: String,
        /// Error message
        message: String,
    },

    /// A readiness or liveness wait exceeded its budget
    #[error("timed out after {after:?} waiting for {operation}{}", last_error_suffix(.last_error))]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Budget that was exhausted
        after: Duration,
        /// Last error a check returned before the budget ran out
        last_error: Option<String>,
    },

    /// Detokenization could not read or write a file
    #[error("failed to detokenize {}: {message}", path.display())]
    Detokenize {
        /// File that failed
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline step failed
    #[error("step {step} failed")]
    Step {
        /// Legacy checkpoint name of the step
        step: String,
        /// Underlying error
        source: Box<Error>,
    },
}

/// How the orchestrator reacts to an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fix the input and re-run; never retried
    Configuration,
    /// External failure that may succeed on retry
    Transient,
    /// Wait budget exhausted; fails the step
    Timeout,
    /// Store unreachable or record undecodable; aborts the run
    Fatal,
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a terraform error for the given module
    pub fn terraform(module: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Terraform {
            module: module.into(),
            message: msg.into(),
        }
    }

    /// Create a kubernetes operation error
    pub fn kube_op(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::KubeOperation {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create an HTTP error for the given service
    pub fn http(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Http {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
            last_error: None,
        }
    }

    /// Create a detokenize error carrying the offending path
    pub fn detokenize(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Detokenize {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the name of the step that produced it
    pub fn step(step: impl std::fmt::Display, source: Error) -> Self {
        Self::Step {
            step: step.to_string(),
            source: Box::new(source),
        }
    }

    /// Display text with the causes of step failures appended.
    ///
    /// Used where only a string survives: logs and the record's `last_condition`.
    pub fn report(&self) -> String {
        match self {
            Error::Step { source, .. } => format!("{self}: {}", source.report()),
            other => other.to_string(),
        }
    }

    /// Classify the error for retry and abort decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) => ErrorCategory::Configuration,
            Error::NotFound(_) | Error::Store(_) | Error::Serialization(_) => ErrorCategory::Fatal,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Step { source, .. } => source.category(),
            Error::Terraform { .. }
            | Error::Kube(_)
            | Error::KubeOperation { .. }
            | Error::Http { .. }
            | Error::Git(_)
            | Error::Command { .. }
            | Error::Detokenize { .. }
            | Error::Io(_) => ErrorCategory::Transient,
        }
    }

    /// Whether a bounded retry may help
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
