//! Backend configuration from the environment.
//!
//! | Variable                  | Meaning                                   |
//! |---------------------------|-------------------------------------------|
//! | `ETHPM_IPFS_BACKEND`      | default backend: infura, gateway, local, fixture |
//! | `ETHPM_IPFS_GATEWAY`      | gateway base URL                          |
//! | `ETHPM_INFURA_API`        | Infura API base URL                       |
//! | `ETHPM_LOCAL_IPFS_API`    | local node API base URL                   |
//! | `ETHPM_HTTP_TIMEOUT_SECS` | HTTP timeout in seconds                   |
//! | `ETHPM_FIXTURE_DIR`       | directory seeding a fixture backend       |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backends::ipfs::{DEFAULT_INFURA_API, DEFAULT_IPFS_GATEWAY, DEFAULT_LOCAL_IPFS_API};
use crate::backends::BackendKind;

pub const ENV_IPFS_BACKEND: &str = "ETHPM_IPFS_BACKEND";
pub const ENV_IPFS_GATEWAY: &str = "ETHPM_IPFS_GATEWAY";
pub const ENV_INFURA_API: &str = "ETHPM_INFURA_API";
pub const ENV_LOCAL_IPFS_API: &str = "ETHPM_LOCAL_IPFS_API";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "ETHPM_HTTP_TIMEOUT_SECS";
pub const ENV_FIXTURE_DIR: &str = "ETHPM_FIXTURE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown IPFS backend '{0}' (expected infura, gateway, local or fixture)")]
    UnknownBackend(String),

    #[error("invalid HTTP timeout '{0}': expected whole seconds")]
    InvalidTimeout(String),

    #[error("fixture backend selected but {} is not set", ENV_FIXTURE_DIR)]
    MissingFixtureDir,

    #[error("failed to load fixtures from {path}: {reason}")]
    Fixture { path: PathBuf, reason: String },
}

/// Settings for building a [`BackendDispatcher`](crate::dispatch::BackendDispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend tried first for IPFS URIs.
    pub default_backend: BackendKind,
    pub ipfs_gateway: String,
    pub infura_api: String,
    pub local_ipfs_api: String,
    pub http_timeout: Duration,
    pub fixture_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::InfuraIpfs,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            infura_api: DEFAULT_INFURA_API.to_string(),
            local_ipfs_api: DEFAULT_LOCAL_IPFS_API.to_string(),
            http_timeout: Duration::from_secs(30),
            fixture_dir: None,
        }
    }
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or empty keys keep defaults.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(name) = get(ENV_IPFS_BACKEND) {
            config.default_backend = parse_backend_name(&name)?;
        }
        if let Some(url) = get(ENV_IPFS_GATEWAY) {
            config.ipfs_gateway = url;
        }
        if let Some(url) = get(ENV_INFURA_API) {
            config.infura_api = url;
        }
        if let Some(url) = get(ENV_LOCAL_IPFS_API) {
            config.local_ipfs_api = url;
        }
        if let Some(secs) = get(ENV_HTTP_TIMEOUT_SECS) {
            let secs: u64 = secs
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(secs.clone()))?;
            config.http_timeout = Duration::from_secs(secs);
        }
        config.fixture_dir = get(ENV_FIXTURE_DIR).map(PathBuf::from);

        if config.default_backend == BackendKind::Fixture && config.fixture_dir.is_none() {
            return Err(ConfigError::MissingFixtureDir);
        }

        Ok(config)
    }
}

fn parse_backend_name(name: &str) -> Result<BackendKind, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "infura" => Ok(BackendKind::InfuraIpfs),
        "gateway" => Ok(BackendKind::IpfsGateway),
        "local" => Ok(BackendKind::LocalIpfs),
        "fixture" => Ok(BackendKind::Fixture),
        _ => Err(ConfigError::UnknownBackend(name.to_string())),
    }
}
