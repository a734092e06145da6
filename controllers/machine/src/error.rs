//! Controller-specific error types.
//!
//! `ControllerError` covers process-level failures (startup, watch loop).
//! `BootstrapError` is what a single orchestration pass returns: every
//! failure is tagged with the phase it happened in and a kind that decides
//! whether the pass is retried.

use crate::store::StoreError;
use kube::Error as KubeError;
use machine_client::MachineClientError;
use nodeadm::ConfigError;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the Machine Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Bootstrap of a machine failed
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Step of the bootstrap sequence an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bind,
    Session,
    EtcdBootstrap,
    ConfigGeneration,
    RemoteWrite,
    RemoteExec,
    StatusUpdate,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Bind => "bind",
            Phase::Session => "session",
            Phase::EtcdBootstrap => "etcd-bootstrap",
            Phase::ConfigGeneration => "config-generation",
            Phase::RemoteWrite => "remote-write",
            Phase::RemoteExec => "remote-exec",
            Phase::StatusUpdate => "status-update",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Resource or credential problem; waits for the resource to change
    Configuration,
    /// Dial, authentication, session or timeout failure
    Transport,
    /// Non-zero exit or unparsable output from a remote command
    RemoteCommand,
    /// Object store failure or exhausted compare-and-set retries
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::RemoteCommand => "remote command",
            ErrorKind::Store => "store",
        };
        f.write_str(s)
    }
}

/// A failed orchestration pass
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{phase}: {kind} error: {message}")]
pub struct BootstrapError {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
}

impl BootstrapError {
    pub fn new(phase: Phase, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(phase, ErrorKind::Configuration, message)
    }

    pub fn remote_command(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(phase, ErrorKind::RemoteCommand, message)
    }

    pub fn from_client(phase: Phase, error: MachineClientError) -> Self {
        let kind = match &error {
            MachineClientError::InvalidKey(_) => ErrorKind::Configuration,
            MachineClientError::CommandFailed { .. } => ErrorKind::RemoteCommand,
            _ => ErrorKind::Transport,
        };
        Self::new(phase, kind, error.to_string())
    }

    pub fn from_store(phase: Phase, error: StoreError) -> Self {
        let kind = match &error {
            StoreError::NotFound { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Store,
        };
        Self::new(phase, kind, error.to_string())
    }

    pub fn from_config(error: ConfigError) -> Self {
        Self::configuration(Phase::ConfigGeneration, error.to_string())
    }

    /// Whether re-running the pass can succeed without a resource change
    pub fn is_retryable(&self) -> bool {
        self.kind != ErrorKind::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_phase() {
        let err = BootstrapError::remote_command(Phase::EtcdBootstrap, "exit 1");
        assert_eq!(err.to_string(), "etcd-bootstrap: remote command error: exit 1");
    }

    #[test]
    fn test_client_error_classification() {
        let key = BootstrapError::from_client(Phase::Session, MachineClientError::InvalidKey("bad".into()));
        assert_eq!(key.kind, ErrorKind::Configuration);
        assert!(!key.is_retryable());

        let dial = BootstrapError::from_client(Phase::Session, MachineClientError::Transport("refused".into()));
        assert_eq!(dial.kind, ErrorKind::Transport);
        assert!(dial.is_retryable());

        let failed = BootstrapError::from_client(
            Phase::RemoteExec,
            MachineClientError::CommandFailed {
                command: "nodeadm init".into(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "boom".into(),
            },
        );
        assert_eq!(failed.kind, ErrorKind::RemoteCommand);
        assert!(failed.is_retryable());
    }

    #[test]
    fn test_store_error_classification() {
        let missing = BootstrapError::from_store(
            Phase::Bind,
            StoreError::NotFound {
                kind: "Cluster".into(),
                name: "ns/c".into(),
            },
        );
        assert_eq!(missing.kind, ErrorKind::Configuration);

        let conflict = BootstrapError::from_store(
            Phase::StatusUpdate,
            StoreError::Conflict {
                kind: "Cluster".into(),
                name: "ns/c".into(),
            },
        );
        assert_eq!(conflict.kind, ErrorKind::Store);
    }
}
