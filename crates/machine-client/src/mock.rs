//! Mock MachineClient for unit testing
//!
//! Tests script the exact sequence of remote calls they expect. Each call is
//! matched against the next expectation in order; unexpected or out-of-order
//! calls fail with a transport error. Every call is recorded, matched or not.

use crate::client_trait::{CommandOutput, MachineClient, MachineClientBuilder, SshTarget};
use crate::error::MachineClientError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    RunCommand(String),
    WriteFile { path: String, mode: u32, content: Vec<u8> },
    Close,
}

#[derive(Debug)]
enum Expectation {
    RunCommand {
        command: String,
        result: Result<CommandOutput, MachineClientError>,
    },
    WriteFile {
        path: String,
        mode: u32,
        result: Result<(), MachineClientError>,
    },
}

/// Scripted in-memory MachineClient
///
/// Clones share expectations and recorded calls, so a test can keep one
/// handle while the code under test owns a boxed clone.
#[derive(Debug, Clone, Default)]
pub struct MockMachineClient {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockMachineClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `command` next, answering with `result`
    pub fn expect_command(&self, command: impl Into<String>, result: Result<CommandOutput, MachineClientError>) -> &Self {
        lock(&self.expectations).push_back(Expectation::RunCommand {
            command: command.into(),
            result,
        });
        self
    }

    /// Expect a write of `path` with `mode` next, answering with `result`
    pub fn expect_write_file(&self, path: impl Into<String>, mode: u32, result: Result<(), MachineClientError>) -> &Self {
        lock(&self.expectations).push_back(Expectation::WriteFile {
            path: path.into(),
            mode,
            result,
        });
        self
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls other than `Close`
    pub fn remote_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != RecordedCall::Close)
            .collect()
    }

    /// Number of expectations not yet consumed
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.expectations).len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.calls).contains(&RecordedCall::Close)
    }
}

#[async_trait::async_trait]
impl MachineClient for MockMachineClient {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, MachineClientError> {
        lock(&self.calls).push(RecordedCall::RunCommand(command.to_string()));

        let mut expectations = lock(&self.expectations);
        match expectations.pop_front() {
            Some(Expectation::RunCommand { command: expected, result }) if expected == command => result,
            Some(other) => {
                let message = format!("unexpected command {:?}, expected {:?}", command, other);
                expectations.push_front(other);
                Err(MachineClientError::Transport(message))
            }
            None => Err(MachineClientError::Transport(format!(
                "unexpected command {:?}, no calls expected",
                command
            ))),
        }
    }

    async fn write_file(&self, path: &str, mode: u32, content: &[u8]) -> Result<(), MachineClientError> {
        lock(&self.calls).push(RecordedCall::WriteFile {
            path: path.to_string(),
            mode,
            content: content.to_vec(),
        });

        let mut expectations = lock(&self.expectations);
        match expectations.pop_front() {
            Some(Expectation::WriteFile {
                path: expected_path,
                mode: expected_mode,
                result,
            }) if expected_path == path && expected_mode == mode => result,
            Some(other) => {
                let message = format!("unexpected write of {} ({:o}), expected {:?}", path, mode, other);
                expectations.push_front(other);
                Err(MachineClientError::Transport(message))
            }
            None => Err(MachineClientError::Transport(format!(
                "unexpected write of {}, no calls expected",
                path
            ))),
        }
    }

    async fn close(&mut self) {
        lock(&self.calls).push(RecordedCall::Close);
    }
}

/// Builder handing out clones of one [`MockMachineClient`]
#[derive(Debug, Clone, Default)]
pub struct MockMachineClientBuilder {
    client: MockMachineClient,
    connects: Arc<Mutex<Vec<SshTarget>>>,
    connect_failures: Arc<Mutex<VecDeque<MachineClientError>>>,
}

impl MockMachineClientBuilder {
    pub fn new(client: MockMachineClient) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    /// Make the next `connect` fail with `error`
    pub fn fail_next_connect(&self, error: MachineClientError) {
        lock(&self.connect_failures).push_back(error);
    }

    /// Targets passed to `connect`, including failed attempts
    pub fn connects(&self) -> Vec<SshTarget> {
        lock(&self.connects).clone()
    }

    pub fn client(&self) -> &MockMachineClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl MachineClientBuilder for MockMachineClientBuilder {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn MachineClient>, MachineClientError> {
        lock(&self.connects).push(target.clone());
        if let Some(error) = lock(&self.connect_failures).pop_front() {
            return Err(error);
        }
        Ok(Box::new(self.client.clone()))
    }
}
