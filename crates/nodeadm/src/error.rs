//! Configuration generation errors

use thiserror::Error;

/// Errors raised while generating bootstrap configuration
///
/// Every variant describes input that must be corrected before generation can
/// succeed; retrying with the same input fails the same way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Cluster network ranges are missing, repeated or malformed
    #[error("invalid cluster networking configuration for cluster {cluster:?}: {reason}")]
    InvalidNetworking { cluster: String, reason: String },

    /// The API server `secure-port` override is not a port number
    #[error("unable to parse api-server secure-port value {0:?}")]
    InvalidSecurePort(String),

    /// Certificate material could not be parsed
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// A required input is missing
    #[error("missing {0}")]
    Missing(String),

    /// YAML rendering failed
    #[error("failed to render configuration: {0}")]
    Render(String),
}
