//! Remote execution errors

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`MachineClient`](crate::MachineClient)
///
/// Transport-level failures are kept apart from commands that ran and
/// exited non-zero; retrying either is up to the caller.
#[derive(Debug, Error)]
pub enum MachineClientError {
    /// Dial, authentication or session failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The command ran on the remote host and exited unsuccessfully
    #[error("command {command:?} failed with exit code {}: {stderr}", display_exit_code(.exit_code))]
    CommandFailed {
        command: String,
        /// `None` when the remote process was killed by a signal
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The command did not finish within the configured timeout
    #[error("command {command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Private key or host public key could not be used
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Local I/O failure while preparing or driving the session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl MachineClientError {
    /// Whether the failure happened below the remote command
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MachineClientError::Transport(_) | MachineClientError::Timeout { .. } | MachineClientError::Io(_)
        )
    }
}
