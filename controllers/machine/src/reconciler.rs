//! Machine reconciliation
//!
//! Maps the outcome of an orchestration pass to a requeue decision:
//!
//! - complete: wait for the next change to the Machine
//! - waiting on another machine or a free ProvisionedMachine: requeue after 30s
//! - transport, remote command or store failure: Fibonacci backoff per Machine
//! - configuration failure: wait for the user to fix the resources

use crate::backoff::MachineBackoff;
use crate::error::ControllerError;
use crate::orchestrator::{Orchestrator, Progress};
use crds::{Machine, MachinePhase};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval while a machine waits on something outside itself
pub const WAITING_REQUEUE: Duration = Duration::from_secs(30);

/// Reconciles Machine resources.
pub struct Reconciler {
    orchestrator: Orchestrator,
    backoff: MachineBackoff,
}

impl Reconciler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            backoff: MachineBackoff::new(),
        }
    }

    pub async fn reconcile_machine(&self, machine: &Machine) -> Result<Action, ControllerError> {
        let name = machine
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("Machine has no metadata.name".to_string()))?;
        let namespace = machine.namespace().unwrap_or_default();
        let resource_key = format!("{}/{}", namespace, name);

        if machine.metadata.deletion_timestamp.is_some() {
            self.orchestrator.delete(machine).await?;
            self.backoff.forget(&resource_key);
            return Ok(Action::await_change());
        }

        if self.orchestrator.exists(machine) && machine.phase() == MachinePhase::Ready {
            self.orchestrator.update(machine).await?;
            return Ok(Action::await_change());
        }

        debug!("Reconciling Machine {}", resource_key);
        match self.orchestrator.create(machine).await {
            Ok(Progress::Complete(phase)) => {
                self.backoff.reset(&resource_key);
                info!("Machine {} reached phase {}", resource_key, phase);
                Ok(Action::await_change())
            }
            Ok(Progress::Waiting(reason)) => {
                self.backoff.reset(&resource_key);
                info!(
                    "Machine {} is waiting: {}; requeuing in {}s",
                    resource_key,
                    reason,
                    WAITING_REQUEUE.as_secs()
                );
                Ok(Action::requeue(WAITING_REQUEUE))
            }
            Err(err) if err.is_retryable() => {
                let (delay, error_count) = self.backoff.record_failure(&resource_key);
                warn!(
                    "Machine {} failed ({} consecutive errors), retrying in {}s: {}",
                    resource_key,
                    error_count,
                    delay.as_secs(),
                    err
                );
                Ok(Action::requeue(delay))
            }
            Err(err) => {
                self.backoff.reset(&resource_key);
                warn!(
                    "Machine {} cannot proceed until its resources change: {}",
                    resource_key, err
                );
                Ok(Action::await_change())
            }
        }
    }
}
