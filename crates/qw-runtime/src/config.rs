//! # Runtime Configuration
//!
//! Defaults come from [`Policy::default`]; every value can be overridden from
//! the environment (after `.env` is loaded by the binary).
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `QW_WORKERS` | 4 | Worker slots |
//! | `QW_MAX_OPS_PER_APP` | 2 | In-flight operations per application |
//! | `QW_MAX_QUEUE` | 512 | Queue capacity |
//! | `QW_OPERATION_TIMEOUT_SECS` | 60 | Dispatcher-side deadline |
//! | `QW_LISTEN_ADDR` | `127.0.0.1:1888` | Dispatch server address |
//! | `QW_WORKER_SECRET` | unset | 64 hex chars; HMAC key for worker tokens |
//! | `QW_SUPERVISION` | `in-process` | `production` or `in-process` |
//! | `QW_SUPERVISOR_GROUP` | `qw-worker` | supervisord program group |
//! | `DISABLE_IN_PROCESS_WORKERS` | unset | `yes` starts no in-process workers |
//!
//! ## Security Requirements
//!
//! - The worker secret MUST be set and non-zero in production mode, since
//!   separately started workers derive their tokens from it.

use qw_01_admission::LimitsConfig;
use qw_04_dispatch_server::default_listen_addr;
use qw_05_supervisor::{DEFAULT_GROUP, DISABLE_IN_PROCESS_WORKERS};
use shared_types::{Policy, PolicyError, WORKER_SECRET_LEN};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// How worker processes are started and replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionMode {
    /// supervisord owns real worker processes.
    Production,
    /// Workers are tokio tasks in this process.
    InProcess,
}

impl FromStr for SupervisionMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "in-process" | "in_process" | "test" => Ok(Self::InProcess),
            _ => Err(ConfigError::InvalidValue {
                var: "QW_SUPERVISION",
                value: value.to_string(),
            }),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub policy: Policy,
    pub limits: LimitsConfig,
    pub listen_addr: SocketAddr,
    /// HMAC key for worker tokens. `None` means a random key is generated at
    /// startup, which only in-process workers can use.
    pub worker_secret: Option<[u8; WORKER_SECRET_LEN]>,
    pub supervision: SupervisionMode,
    pub supervisor_group: String,
    pub in_process_workers_disabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let policy = Policy::default();
        Self {
            limits: LimitsConfig::for_workers(policy.number_of_workers),
            policy,
            listen_addr: default_listen_addr(),
            worker_secret: None,
            supervision: SupervisionMode::InProcess,
            supervisor_group: DEFAULT_GROUP.to_string(),
            in_process_workers_disabled: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse_var::<usize, _>(&lookup, "QW_WORKERS")? {
            config.policy.number_of_workers = workers;
            config.limits.worker_activity_permits = workers;
        }
        if let Some(cap) = parse_var(&lookup, "QW_MAX_OPS_PER_APP")? {
            config.policy.max_ops_per_application = cap;
        }
        if let Some(capacity) = parse_var(&lookup, "QW_MAX_QUEUE")? {
            config.policy.max_queue_length = capacity;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "QW_OPERATION_TIMEOUT_SECS")? {
            config.policy.operation_timeout = Duration::from_secs(secs);
            if config.policy.wedged_worker_timeout < config.policy.operation_timeout {
                config.policy.wedged_worker_timeout = config.policy.operation_timeout;
            }
        }
        if let Some(addr) = parse_var(&lookup, "QW_LISTEN_ADDR")? {
            config.listen_addr = addr;
        }
        if let Some(secret_hex) = lookup("QW_WORKER_SECRET") {
            config.worker_secret = Some(parse_secret(&secret_hex)?);
        }
        if let Some(mode) = lookup("QW_SUPERVISION") {
            config.supervision = mode.parse()?;
        }
        if let Some(group) = lookup("QW_SUPERVISOR_GROUP") {
            config.supervisor_group = group;
        }
        config.in_process_workers_disabled =
            lookup(DISABLE_IN_PROCESS_WORKERS).is_some_and(|value| value == "yes");

        config.policy.validate()?;
        Ok(config)
    }

    /// Rejects settings that are only acceptable in development.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        match self.worker_secret {
            None => Err(ConfigError::MissingWorkerSecret),
            Some(secret) if secret == [0u8; WORKER_SECRET_LEN] => {
                Err(ConfigError::InsecureWorkerSecret)
            }
            Some(_) => Ok(()),
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

fn parse_secret(secret_hex: &str) -> Result<[u8; WORKER_SECRET_LEN], ConfigError> {
    let bytes = hex::decode(secret_hex.trim()).map_err(|_| ConfigError::InvalidValue {
        var: "QW_WORKER_SECRET",
        value: "<redacted>".to_string(),
    })?;
    if bytes.len() != WORKER_SECRET_LEN {
        warn!(
            "QW_WORKER_SECRET has wrong length ({} bytes), expected {WORKER_SECRET_LEN}",
            bytes.len()
        );
        return Err(ConfigError::InvalidValue {
            var: "QW_WORKER_SECRET",
            value: format!("<{} bytes>", bytes.len()),
        });
    }
    let mut secret = [0u8; WORKER_SECRET_LEN];
    secret.copy_from_slice(&bytes);
    Ok(secret)
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(
        "SECURITY VIOLATION: worker secret is not set. \
         Set QW_WORKER_SECRET so separately started workers can authenticate."
    )]
    MissingWorkerSecret,

    #[error(
        "SECURITY VIOLATION: worker secret is the default zero value. \
         Set QW_WORKER_SECRET to 32 random bytes (64 hex chars)."
    )]
    InsecureWorkerSecret,
}
