//! Remote Execution Client
//!
//! Runs commands and writes files on a provisioned machine. The orchestrator
//! only sees the [`MachineClient`] and [`MachineClientBuilder`] traits; the
//! shipped implementation drives the system OpenSSH client through a
//! ControlMaster session.
//!
//! # Example
//!
//! ```no_run
//! use machine_client::{HostKeyPolicy, MachineClientBuilder, SshMachineClientBuilder, SshOptions, SshTarget};
//!
//! # async fn example() -> Result<(), machine_client::MachineClientError> {
//! let builder = SshMachineClientBuilder::new(SshOptions::default());
//! let target = SshTarget {
//!     host: "10.0.0.10".to_string(),
//!     port: 22,
//!     username: "root".to_string(),
//!     private_key: std::fs::read("/secrets/id_ed25519")?,
//!     host_keys: HostKeyPolicy::InsecureIgnore,
//! };
//!
//! let mut client = builder.connect(&target).await?;
//! let output = client.run_command("uname -a").await?;
//! println!("{}", output.stdout_lossy());
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod keys;
#[path = "trait.rs"]
pub mod client_trait;
pub mod ssh;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client_trait::{CommandOutput, MachineClient, MachineClientBuilder, SshTarget};
pub use error::MachineClientError;
pub use keys::{HostKeyPolicy, PublicKey, validate_private_key};
pub use ssh::{SshMachineClient, SshMachineClientBuilder, SshOptions};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockMachineClient, MockMachineClientBuilder, RecordedCall};
