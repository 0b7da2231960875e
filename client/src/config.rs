//! Configuration management for the sync runtime.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one snapshot file per user
    pub data_dir: PathBuf,
    /// Base URL of the remote document store
    pub remote_url: String,
    /// URL the connectivity probe polls
    pub health_url: String,
    /// User whose queue this process drains
    pub owner_id: String,
    /// Bearer token for the remote store
    pub auth_token: Option<String>,
    /// How often connectivity is re-checked
    pub probe_interval: Duration,
    /// Per-request timeout for remote calls
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("TALLY_DATA_DIR")
            .unwrap_or_else(|_| "./tally-data".to_string())
            .into();

        let remote_url = env::var("TALLY_REMOTE_URL")
            .map_err(|_| ConfigError::MissingRemoteUrl)?
            .trim_end_matches('/')
            .to_string();

        let health_url =
            env::var("TALLY_HEALTH_URL").unwrap_or_else(|_| format!("{remote_url}/health"));

        let owner_id = env::var("TALLY_OWNER_ID").map_err(|_| ConfigError::MissingOwnerId)?;
        if owner_id.trim().is_empty() {
            return Err(ConfigError::MissingOwnerId);
        }

        let auth_token = env::var("TALLY_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let probe_interval = seconds("TALLY_PROBE_INTERVAL_SECS", 15)?;
        let request_timeout = seconds("TALLY_REQUEST_TIMEOUT_SECS", 30)?;

        Ok(Self {
            data_dir,
            remote_url,
            health_url,
            owner_id,
            auth_token,
            probe_interval,
            request_timeout,
        })
    }
}

fn seconds(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidDuration(name))?,
        Err(_) => default,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidDuration(name));
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TALLY_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("TALLY_OWNER_ID environment variable is required")]
    MissingOwnerId,

    #[error("{0} must be a positive number of seconds")]
    InvalidDuration(&'static str),
}
