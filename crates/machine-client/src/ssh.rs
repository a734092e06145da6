//! OpenSSH-backed MachineClient
//!
//! Each session starts one `ssh -M` ControlMaster process; every command is a
//! short-lived `ssh -S <socket>` multiplexed over it. Key material and the
//! known_hosts file live in a private temporary directory that is removed
//! when the client is dropped.

use crate::client_trait::{CommandOutput, MachineClient, MachineClientBuilder, SshTarget};
use crate::error::MachineClientError;
use crate::keys::{HostKeyPolicy, validate_private_key};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// `ssh` exits with 255 when the failure is its own rather than the command's
const SSH_TRANSPORT_EXIT_CODE: i32 = 255;

/// Options for the OpenSSH adapter
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Path or name of the `ssh` binary
    pub binary: PathBuf,
    pub connect_timeout: Duration,
    /// Upper bound for any single remote command
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
        }
    }
}

/// Opens [`SshMachineClient`] sessions
#[derive(Debug, Clone, Default)]
pub struct SshMachineClientBuilder {
    options: SshOptions,
}

impl SshMachineClientBuilder {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait::async_trait]
impl MachineClientBuilder for SshMachineClientBuilder {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn MachineClient>, MachineClientError> {
        let client = SshMachineClient::connect(self.options.clone(), target).await?;
        Ok(Box::new(client))
    }
}

/// A live ControlMaster session to one host
#[derive(Debug)]
pub struct SshMachineClient {
    options: SshOptions,
    destination: String,
    port: u16,
    control_path: PathBuf,
    master: Option<Child>,
    // Removed on drop, taking the key and socket with it
    _workdir: TempDir,
}

impl SshMachineClient {
    /// Start the ControlMaster and wait until it accepts multiplexed sessions
    pub async fn connect(options: SshOptions, target: &SshTarget) -> Result<Self, MachineClientError> {
        validate_private_key(&target.private_key)?;

        let workdir = tempfile::Builder::new().prefix("machine-client-").tempdir()?;
        let key_path = workdir.path().join("id");
        write_private(&key_path, &target.private_key).await?;

        let known_hosts_path = workdir.path().join("known_hosts");
        let strict = match &target.host_keys {
            HostKeyPolicy::Fixed(keys) => {
                let lines: Vec<String> = keys
                    .iter()
                    .map(|k| k.known_hosts_line(&target.host, target.port))
                    .collect();
                write_private(&known_hosts_path, format!("{}\n", lines.join("\n")).as_bytes()).await?;
                "yes"
            }
            HostKeyPolicy::InsecureIgnore => {
                write_private(&known_hosts_path, b"").await?;
                "no"
            }
        };

        let control_path = workdir.path().join("ctl");
        let destination = format!("{}@{}", target.username, target.host);

        debug!("Starting SSH control master for {}:{}", target.host, target.port);
        let mut master = Command::new(&options.binary);
        master
            .arg("-M")
            .arg("-N")
            .arg("-S")
            .arg(&control_path)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "IdentitiesOnly=yes"])
            .args(["-o", "ControlPersist=no"])
            .args(["-o", "ServerAliveInterval=15"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", options.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", strict))
            .arg("-o")
            .arg(format!("UserKnownHostsFile={}", known_hosts_path.display()))
            .arg("-i")
            .arg(&key_path)
            .arg("-p")
            .arg(target.port.to_string())
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let master = master
            .spawn()
            .map_err(|e| MachineClientError::Transport(format!("failed to start {}: {}", options.binary.display(), e)))?;

        let mut client = Self {
            options,
            destination,
            port: target.port,
            control_path,
            master: Some(master),
            _workdir: workdir,
        };

        if let Err(e) = client.wait_for_master().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    async fn wait_for_master(&mut self) -> Result<(), MachineClientError> {
        let deadline = tokio::time::Instant::now() + self.options.connect_timeout + Duration::from_secs(2);

        loop {
            if let Some(master) = self.master.as_mut() {
                if let Some(status) = master.try_wait()? {
                    let stderr = match master.stderr.take() {
                        Some(pipe) => drain_stderr(pipe, &self.destination).await,
                        None => String::new(),
                    };
                    return Err(MachineClientError::Transport(format!(
                        "ssh to {} exited with {}: {}",
                        self.destination,
                        status,
                        stderr.trim()
                    )));
                }
            }

            let check = self
                .control_command()
                .args(["-O", "check"])
                .arg(&self.destination)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await?;
            if check.success() {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(MachineClientError::Transport(format!(
                    "timed out connecting to {} port {}",
                    self.destination, self.port
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn control_command(&self) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-o", "ControlMaster=no"])
            .args(["-o", "BatchMode=yes"])
            .arg("-p")
            .arg(self.port.to_string())
            .kill_on_drop(true);
        cmd
    }

    fn remote_command(&self, command: &str) -> Command {
        let mut cmd = self.control_command();
        cmd.arg(&self.destination).arg("--").arg(command);
        cmd
    }

    async fn run(&self, command: &str, mut cmd: Command, stdin: Option<&[u8]>) -> Result<CommandOutput, MachineClientError> {
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let timeout = self.options.command_timeout;
        let exec = async {
            let mut child = cmd.spawn()?;
            if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(content).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(timeout, exec)
            .await
            .map_err(|_| MachineClientError::Timeout {
                command: command.to_string(),
                timeout,
            })??;

        command_result(
            &self.destination,
            command,
            output.status.code(),
            CommandOutput::new(output.stdout, output.stderr),
        )
    }
}

/// Map an `ssh` exit code onto the command's outcome
fn command_result(
    destination: &str,
    command: &str,
    code: Option<i32>,
    output: CommandOutput,
) -> Result<CommandOutput, MachineClientError> {
    match code {
        Some(0) => Ok(output),
        Some(SSH_TRANSPORT_EXIT_CODE) => Err(MachineClientError::Transport(format!(
            "ssh session to {} failed: {}",
            destination,
            output.stderr_lossy().trim()
        ))),
        code => Err(MachineClientError::CommandFailed {
            command: command.to_string(),
            exit_code: code,
            stdout: output.stdout_lossy().into_owned(),
            stderr: output.stderr_lossy().into_owned(),
        }),
    }
}

/// Read whatever the control master wrote to stderr before it exited
async fn drain_stderr<R: AsyncRead + Unpin>(mut pipe: R, destination: &str) -> String {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!("Failed to read ssh stderr for {}: {}", destination, e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait::async_trait]
impl MachineClient for SshMachineClient {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, MachineClientError> {
        debug!("Running {:?} on {}", command, self.destination);
        self.run(command, self.remote_command(command), None).await
    }

    async fn write_file(&self, path: &str, mode: u32, content: &[u8]) -> Result<(), MachineClientError> {
        let command = format!("install -m {:o} /dev/stdin {}", mode, shell_quote(path));
        debug!("Writing {} ({} bytes) on {}", path, content.len(), self.destination);
        self.run(&command, self.remote_command(&command), Some(content)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let Some(mut master) = self.master.take() else {
            return;
        };

        let exit = self
            .control_command()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = exit {
            debug!("ssh -O exit for {} failed: {}", self.destination, e);
        }

        if let Err(e) = master.kill().await {
            warn!("Failed to stop SSH control master for {}: {}", self.destination, e);
        }
        debug!("Closed SSH session to {}", self.destination);
    }
}

async fn write_private(path: &Path, content: &[u8]) -> Result<(), MachineClientError> {
    tokio::fs::write(path, content).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

/// Quote a single argument for a POSIX shell
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
