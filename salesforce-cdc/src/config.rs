use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::pubsub::Replay;

/// Environment variable overriding [`Config::endpoint`].
pub const ENDPOINT_ENV: &str = "SALESFORCE_GRPC_ENDPOINT";

/// Environment variable overriding [`Config::login_url`].
pub const LOGIN_URL_ENV: &str = "SALESFORCE_LOGIN_URL";

/// Errors that can occur while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file at {path}: {source}")]
    ReadConfig {
        /// Path to the configuration file that failed to read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse configuration JSON.
    #[error("Failed to parse config JSON: {source}")]
    ParseConfig {
        #[source]
        source: serde_json::Error,
    },
    /// A configuration value is out of range.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Description of what's wrong.
        message: String,
    },
}

/// Where a subscription starts when no replay cursor is stored for a topic.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStart {
    /// Only events published after the subscription is opened.
    #[default]
    Latest,
    /// Every event still retained by the event bus.
    Earliest,
}

impl From<ReplayStart> for Replay {
    fn from(start: ReplayStart) -> Self {
        match start {
            ReplayStart::Latest => Replay::Latest,
            ReplayStart::Earliest => Replay::Earliest,
        }
    }
}

/// Backoff applied between reconnect attempts of a stream session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound of the exponential backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts allowed before giving up. `None` retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay before reconnect `attempt` (1-based).
    ///
    /// The delay doubles per attempt up to `max_backoff_ms`. Half of it is randomized so that
    /// sessions dropped together do not reconnect in lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let ceiling = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        let half = ceiling / 2;
        let jitter = if half > 0 {
            rand::thread_rng().gen_range(0..=half)
        } else {
            0
        };
        Duration::from_millis(ceiling - half + jitter)
    }

    /// Returns true once `attempt` exceeds the configured maximum.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// Engine configuration.
///
/// Every field has a default, so a config file only needs the values it changes:
///
/// ```json
/// {
///   "topics": ["/data/AccountChangeEvent", "/data/ContactChangeEvent"],
///   "appetite": 10,
///   "replay": "earliest",
///   "reconnect": { "max_attempts": 20 }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Pub/Sub API gRPC endpoint.
    pub endpoint: String,
    /// Salesforce login host for OAuth2 (`https://test.salesforce.com` for sandboxes).
    pub login_url: String,
    /// OAuth2 redirect URI registered on the connected app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Topics subscribed for every linked tenant.
    pub topics: Vec<String>,
    /// Events requested per flow-control refill.
    pub appetite: i32,
    /// Start position for topics without a stored replay cursor.
    pub replay: ReplayStart,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectPolicy,
    /// Seconds a draining session waits for the server to end the stream.
    pub drain_timeout_secs: u64,
    /// Seconds allowed for establishing the gRPC connection.
    pub connect_timeout_secs: u64,
    /// Report a job as failed when any of its topic sessions failed.
    pub fail_on_topic_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: salesforce_pubsub_v1::eventbus::ENDPOINT.to_string(),
            login_url: crate::DEFAULT_LOGIN_URL.to_string(),
            redirect_uri: None,
            topics: vec![crate::DEFAULT_TOPIC.to_string()],
            appetite: crate::DEFAULT_APPETITE,
            replay: ReplayStart::default(),
            reconnect: ReconnectPolicy::default(),
            drain_timeout_secs: crate::DEFAULT_DRAIN_TIMEOUT_SECS,
            connect_timeout_secs: crate::DEFAULT_CONNECT_TIMEOUT_SECS,
            fail_on_topic_error: false,
        }
    }
}

/// Source for loading configuration.
#[derive(Debug, Clone)]
pub enum ConfigFrom {
    /// Load configuration from a JSON file.
    Path(PathBuf),
    /// Use configuration provided directly.
    Value(Config),
}

impl Config {
    /// Loads and validates configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read ([`Error::ReadConfig`])
    /// - The JSON is invalid ([`Error::ParseConfig`])
    /// - A value is out of range ([`Error::InvalidValue`])
    pub fn load(from: ConfigFrom) -> Result<Self, Error> {
        let config = match from {
            ConfigFrom::Value(config) => config,
            ConfigFrom::Path(path) => {
                let contents = fs::read_to_string(&path)
                    .map_err(|source| Error::ReadConfig { path, source })?;
                serde_json::from_str(&contents).map_err(|source| Error::ParseConfig { source })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that values are usable by the engine.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=crate::MAX_APPETITE).contains(&self.appetite) {
            return Err(Error::InvalidValue {
                field: "appetite",
                message: format!(
                    "must be between 1 and {}, got {}",
                    crate::MAX_APPETITE,
                    self.appetite
                ),
            });
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(Error::InvalidValue {
                field: "reconnect",
                message: "initial_backoff_ms exceeds max_backoff_ms".to_string(),
            });
        }
        if self.endpoint.is_empty() {
            return Err(Error::InvalidValue {
                field: "endpoint",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Applies overrides from [`ENDPOINT_ENV`] and [`LOGIN_URL_ENV`].
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|value| !value.is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(login_url) = lookup(LOGIN_URL_ENV).filter(|value| !value.is_empty()) {
            self.login_url = login_url;
        }
        self
    }

    /// Start position for topics without a stored cursor.
    pub fn replay(&self) -> Replay {
        self.replay.into()
    }

    /// Drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
