//! Configuration for the Loki shipper.
//!
//! Every pipeline owns its own [`Config`]; there is no process-wide state.
//! Values can be built in code (starting from [`Config::default`]) or loaded
//! from environment variables with [`Config::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::record::Labels;

/// Default Loki base URL
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3100";

/// Path of the Loki push API, appended to the endpoint
pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// Default number of records per batch
pub const DEFAULT_BATCH_MAX_SIZE: usize = 1000;

/// Default time a partial batch may wait before it is flushed
pub const DEFAULT_BATCH_MAX_WAIT: Duration = Duration::from_secs(1);

/// Default number of records that may sit in the hand-off channel
pub const DEFAULT_HANDOFF_CAPACITY: usize = 16;

/// Levels forwarded to Loki unless configured otherwise: everything except
/// `DEBUG` and `TRACE`.
pub const DEFAULT_VISIBLE_LEVELS: &[Level] = &[Level::ERROR, Level::WARN, Level::INFO];

const ENV_ENDPOINT: &str = "LOKI_ENDPOINT";
const ENV_BATCH_MAX_SIZE: &str = "LOKI_BATCH_MAX_SIZE";
const ENV_BATCH_MAX_WAIT_MS: &str = "LOKI_BATCH_MAX_WAIT_MS";
const ENV_LABELS: &str = "LOKI_LABELS";
const ENV_USERNAME: &str = "LOKI_USERNAME";
const ENV_PASSWORD: &str = "LOKI_PASSWORD";
const ENV_VISIBLE_LEVELS: &str = "LOKI_VISIBLE_LEVELS";
const ENV_HANDOFF_CAPACITY: &str = "LOKI_HANDOFF_CAPACITY";

/// Configuration for a Loki shipping pipeline.
///
/// Environment variables understood by [`Config::from_env`]:
/// - `LOKI_ENDPOINT`: Loki base URL (default: http://localhost:3100)
/// - `LOKI_BATCH_MAX_SIZE`: records per batch (default: 1000)
/// - `LOKI_BATCH_MAX_WAIT_MS`: milliseconds a partial batch may wait (default: 1000)
/// - `LOKI_LABELS`: stream labels as `key=value,key=value` (default: none)
/// - `LOKI_USERNAME` / `LOKI_PASSWORD`: basic auth credentials (default: unset)
/// - `LOKI_VISIBLE_LEVELS`: forwarded levels, e.g. `error,warn,info`
/// - `LOKI_HANDOFF_CAPACITY`: records buffered between producers and the pusher (default: 16)
#[derive(Debug, Clone)]
pub struct Config {
    /// Loki base URL; the push path is appended by [`Config::push_url`]
    pub endpoint: String,

    /// Number of records that triggers an immediate flush
    pub batch_max_size: usize,

    /// Longest time a non-empty batch waits before it is flushed
    pub batch_max_wait: Duration,

    /// Labels attached to every pushed stream
    pub labels: Labels,

    /// Basic auth user name
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Event levels the tracing layer forwards
    pub visible_levels: Vec<Level>,

    /// Capacity of the producer hand-off channel; 0 makes every push a rendezvous
    pub handoff_capacity: usize,
}

/// Error type for configuration loading failures
#[derive(Debug, Error)]
#[error("Configuration error for {env_var}: {message}")]
pub struct ConfigError {
    pub message: String,
    pub env_var: String,
}

impl ConfigError {
    fn new(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: env_var.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }

        if let Some(value) = lookup(ENV_BATCH_MAX_SIZE) {
            let size: usize = parse_number(ENV_BATCH_MAX_SIZE, &value)?;
            if size == 0 {
                return Err(ConfigError::new(
                    ENV_BATCH_MAX_SIZE,
                    "batch size must be greater than 0",
                ));
            }
            config.batch_max_size = size;
        }

        if let Some(value) = lookup(ENV_BATCH_MAX_WAIT_MS) {
            let millis: u64 = parse_number(ENV_BATCH_MAX_WAIT_MS, &value)?;
            if millis == 0 {
                return Err(ConfigError::new(
                    ENV_BATCH_MAX_WAIT_MS,
                    "batch wait must be greater than 0",
                ));
            }
            config.batch_max_wait = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(ENV_LABELS) {
            config.labels = parse_labels(&value)?;
        }

        config.username = lookup(ENV_USERNAME);
        config.password = lookup(ENV_PASSWORD);

        if let Some(value) = lookup(ENV_VISIBLE_LEVELS) {
            config.visible_levels = parse_levels(&value)?;
        }

        if let Some(value) = lookup(ENV_HANDOFF_CAPACITY) {
            config.handoff_capacity = parse_number(ENV_HANDOFF_CAPACITY, &value)?;
        }

        Ok(config)
    }

    /// Full URL of the push API.
    ///
    /// Trailing slashes on the endpoint are dropped so the path is never
    /// joined with a double slash.
    pub fn push_url(&self) -> String {
        let base = if self.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            self.endpoint.as_str()
        };
        format!("{}{}", base.trim_end_matches('/'), PUSH_PATH)
    }

    /// Replace zero or empty settings with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.endpoint.is_empty() {
            self.endpoint = DEFAULT_ENDPOINT.to_string();
        }
        if self.batch_max_size == 0 {
            self.batch_max_size = DEFAULT_BATCH_MAX_SIZE;
        }
        if self.batch_max_wait.is_zero() {
            self.batch_max_wait = DEFAULT_BATCH_MAX_WAIT;
        }
        if self.visible_levels.is_empty() {
            self.visible_levels = DEFAULT_VISIBLE_LEVELS.to_vec();
        }
        self
    }

    /// Basic auth credentials, only when both parts are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            batch_max_wait: DEFAULT_BATCH_MAX_WAIT,
            labels: Labels::new(),
            username: None,
            password: None,
            visible_levels: DEFAULT_VISIBLE_LEVELS.to_vec(),
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
        }
    }
}

fn parse_number<T: FromStr>(env_var: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(env_var, format!("'{}' is not a valid number", value)))
}

/// Parse `key=value,key=value` into a label set. Blank entries are skipped.
fn parse_labels(value: &str) -> Result<Labels, ConfigError> {
    let mut labels = Labels::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, val) = pair.split_once('=').ok_or_else(|| {
            ConfigError::new(ENV_LABELS, format!("'{}' is not a key=value pair", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::new(
                ENV_LABELS,
                format!("'{}' has an empty label name", pair),
            ));
        }
        labels.insert(key.to_string(), val.trim().to_string());
    }
    Ok(labels)
}

fn parse_levels(value: &str) -> Result<Vec<Level>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            Level::from_str(l)
                .map_err(|_| ConfigError::new(ENV_VISIBLE_LEVELS, format!("'{}' is not a log level", l)))
        })
        .collect()
}
