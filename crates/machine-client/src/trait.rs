//! MachineClient traits
//!
//! The orchestrator talks to remote hosts only through these traits so tests
//! can substitute a scripted mock for a real SSH session.

use crate::error::MachineClientError;
use crate::keys::HostKeyPolicy;
use std::borrow::Cow;

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Everything needed to open a session to one host
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// PEM or OpenSSH-format private key
    pub private_key: Vec<u8>,
    pub host_keys: HostKeyPolicy,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &"<redacted>")
            .field("host_keys", &self.host_keys)
            .finish()
    }
}

/// An open session to a remote machine
///
/// Commands run sequentially. Callers must `close` the session on every
/// exit path; implementations also release resources on drop.
#[async_trait::async_trait]
pub trait MachineClient: Send + Sync {
    /// Run a shell command, failing if it exits non-zero
    async fn run_command(&self, command: &str) -> Result<CommandOutput, MachineClientError>;

    /// Write `content` to `path` with the given permission bits
    async fn write_file(&self, path: &str, mode: u32, content: &[u8]) -> Result<(), MachineClientError>;

    /// Tear down the session
    async fn close(&mut self);
}

/// Opens [`MachineClient`] sessions
#[async_trait::async_trait]
pub trait MachineClientBuilder: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn MachineClient>, MachineClientError>;
}
