use std::str::FromStr;
use std::time::Duration;

use jobwatch_core::host;

use crate::registry::{KeySpace, DEFAULT_GROUP_PREFIX, DEFAULT_NODE_PREFIX};

/// Default pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Default minutes between retention sweeps.
const DEFAULT_CLEAN_PERIOD_MINS: u64 = 60;

/// Default days an execution record is kept.
const DEFAULT_EXPIRATION_DAYS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Could not detect {0}; set it explicitly")]
    Undetected(&'static str),
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub node_id: String,
    pub node_ip: String,
    pub keys: KeySpace,
    /// `None` disables the retention scheduler.
    pub log_clean_period: Option<Duration>,
    pub log_expiration: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default                   |
    /// |----------------------------|---------------------------|
    /// | `DATABASE_URL`             | required                  |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`                      |
    /// | `NODE_ID`                  | `/etc/machine-id`         |
    /// | `NODE_IP`                  | detected outbound address |
    /// | `NODE_KEY_PREFIX`          | `/jobwatch/node/`         |
    /// | `GROUP_KEY_PREFIX`         | `/jobwatch/group/`        |
    /// | `LOG_CLEAN_PERIOD_MINS`    | `60` (`0` disables)       |
    /// | `LOG_EXPIRATION_DAYS`      | `30`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let database_max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        let node_id = match non_empty(&lookup, "NODE_ID") {
            Some(id) => id,
            None => host::machine_id().ok_or(ConfigError::Undetected("NODE_ID"))?,
        };

        let node_ip = match non_empty(&lookup, "NODE_IP") {
            Some(ip) => ip,
            None => host::outbound_ip()
                .map(|ip| ip.to_string())
                .ok_or(ConfigError::Undetected("NODE_IP"))?,
        };

        let keys = KeySpace {
            node_prefix: non_empty(&lookup, "NODE_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_NODE_PREFIX.to_string()),
            group_prefix: non_empty(&lookup, "GROUP_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_GROUP_PREFIX.to_string()),
        };

        let clean_mins: u64 = parse_or(&lookup, "LOG_CLEAN_PERIOD_MINS", DEFAULT_CLEAN_PERIOD_MINS)?;
        let expiration_days: u64 =
            parse_or(&lookup, "LOG_EXPIRATION_DAYS", DEFAULT_EXPIRATION_DAYS)?;

        let clean_secs = seconds_of("LOG_CLEAN_PERIOD_MINS", clean_mins, 60)?;
        let expiration_secs = seconds_of("LOG_EXPIRATION_DAYS", expiration_days, 24 * 3600)?;

        Ok(Self {
            database_url,
            database_max_connections,
            node_id,
            node_ip,
            keys,
            log_clean_period: (clean_secs > 0).then(|| Duration::from_secs(clean_secs)),
            log_expiration: Duration::from_secs(expiration_secs),
        })
    }
}

/// `value` units of `unit_secs` seconds each, rejecting overflow.
fn seconds_of(var: &'static str, value: u64, unit_secs: u64) -> Result<u64, ConfigError> {
    value
        .checked_mul(unit_secs)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "number too large".to_string(),
        })
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
