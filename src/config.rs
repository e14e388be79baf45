//! Configuration management for Simple NAS

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default request body cap: 1 GiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub approval: ApprovalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// The flat directory being served
    pub root: PathBuf,
    pub max_upload_bytes: usize,
    /// Extra protected names, on top of the built-in ones
    pub protected: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    pub mode: ApprovalMode,
    /// How long a delete request waits for the admin
    pub timeout_secs: u64,
    /// Maximum age of an unconsumed pending delete
    pub pending_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask the operator on the server console
    Console,
    /// Refuse every delete (unattended servers)
    Deny,
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(ApprovalMode::Console),
            "deny" => Ok(ApprovalMode::Deny),
            other => Err(format!("unknown approval mode {other:?}")),
        }
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            storage: StorageConfig {
                root: PathBuf::from("."),
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                protected: Vec::new(),
            },
            approval: ApprovalConfig {
                mode: ApprovalMode::Console,
                timeout_secs: 300,
                pending_ttl_secs: 900,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("NAS_HOST").unwrap_or(defaults.server.host),
                port: parse_var("NAS_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                root: env::var("NAS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.root),
                max_upload_bytes: parse_var("NAS_MAX_UPLOAD_BYTES", defaults.storage.max_upload_bytes)?,
                protected: env::var("NAS_PROTECTED")
                    .map(|v| split_list(&v))
                    .unwrap_or_default(),
            },
            approval: ApprovalConfig {
                mode: parse_var("NAS_APPROVAL", defaults.approval.mode)?,
                timeout_secs: parse_var("NAS_APPROVAL_TIMEOUT_SECS", defaults.approval.timeout_secs)?,
                pending_ttl_secs: parse_var("NAS_PENDING_TTL_SECS", defaults.approval.pending_ttl_secs)?,
            },
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    parse_value(name, env::var(name).ok(), default)
}

fn parse_value<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
