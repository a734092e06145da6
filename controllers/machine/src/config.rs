//! Controller configuration from environment variables

use crate::error::ControllerError;
use machine_client::SshOptions;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub ssh: SshOptions,
    /// Skip host key verification for every ProvisionedMachine
    pub insecure_ignore_host_key: bool,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SshOptions::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let watch_namespace = get("WATCH_NAMESPACE");

        let insecure_ignore_host_key = match get("SSH_INSECURE_IGNORE_HOST_KEY") {
            None => false,
            Some(v) => parse_bool("SSH_INSECURE_IGNORE_HOST_KEY", &v)?,
        };

        let connect_timeout = match get("SSH_CONNECT_TIMEOUT_SECS") {
            None => defaults.connect_timeout,
            Some(v) => parse_secs("SSH_CONNECT_TIMEOUT_SECS", &v)?,
        };

        let command_timeout = match get("SSH_COMMAND_TIMEOUT_SECS") {
            None => defaults.command_timeout,
            Some(v) => parse_secs("SSH_COMMAND_TIMEOUT_SECS", &v)?,
        };

        let binary = get("SSH_BINARY").map(PathBuf::from).unwrap_or(defaults.binary);

        Ok(Self {
            watch_namespace,
            ssh: SshOptions {
                binary,
                connect_timeout,
                command_timeout,
            },
            insecure_ignore_host_key,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ControllerError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            key, value
        ))),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ControllerError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{} must be a positive number of seconds, got {:?}",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert!(!config.insecure_ignore_host_key);
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ssh.command_timeout, Duration::from_secs(600));
        assert_eq!(config.ssh.binary, PathBuf::from("ssh"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "bootstrap"),
            ("SSH_INSECURE_IGNORE_HOST_KEY", "true"),
            ("SSH_CONNECT_TIMEOUT_SECS", "5"),
            ("SSH_COMMAND_TIMEOUT_SECS", "1200"),
            ("SSH_BINARY", "/usr/bin/ssh"),
        ])
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("bootstrap"));
        assert!(config.insecure_ignore_host_key);
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.ssh.command_timeout, Duration::from_secs(1200));
        assert_eq!(config.ssh.binary, PathBuf::from("/usr/bin/ssh"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("SSH_INSECURE_IGNORE_HOST_KEY", "maybe")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("SSH_CONNECT_TIMEOUT_SECS", "ten")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("SSH_COMMAND_TIMEOUT_SECS", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
