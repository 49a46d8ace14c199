//! # Server Configuration
//!
//! [`AppConfig`] is read once at startup from environment variables.
//! Parsing goes through a lookup function so tests never touch the real
//! process environment. Invalid values fail startup with a [`ConfigError`]
//! naming the variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use licd_crypto::{HmacVerifier, VendorSecret, DEFAULT_SIGNATURE_WINDOW_SECS};
use licd_state::{
    CoordinatorConfig, PoolConfig, DEFAULT_LEASE_TIMEOUT, DEFAULT_MAX_LEASES,
    DEFAULT_TERMINAL_RETENTION,
};
use thiserror::Error;

/// Default port of the HTTP server.
pub const DEFAULT_PORT: u16 = 8000;
/// Default reclamation sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
/// Vendor assumed when a signed request omits `X-Vendor-ID`.
pub const DEFAULT_VENDOR: &str = "techvendor";

/// A configuration variable held an unusable value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Runtime configuration of the `licd-api` server.
///
/// Custom `Debug` redacts the bearer token, vendor secrets and the
/// database URL.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Static bearer API key. `None` disables bearer authentication.
    pub auth_token: Option<String>,
    /// YAML tool catalog loaded at startup.
    pub tools_file: Option<PathBuf>,
    /// Seed the demo catalog when no file is given.
    pub seed_demo: bool,
    /// Pool defaults for tools created on first borrow. `None` rejects
    /// unknown tools.
    pub auto_create: Option<PoolConfig>,
    pub lease_timeout: Duration,
    pub sweep_interval: Duration,
    pub terminal_retention: Duration,
    pub max_leases: usize,
    pub vendor_secrets: Vec<(String, VendorSecret)>,
    pub require_signatures: bool,
    pub signature_window_secs: u64,
    pub default_vendor: String,
    pub app_version: String,
    pub database_url: Option<String>,
    pub metrics_enabled: bool,
    /// Emit logs as JSON lines (`LOG_FORMAT=json`).
    pub log_json: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vendors: Vec<&str> = self.vendor_secrets.iter().map(|(v, _)| v.as_str()).collect();
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("tools_file", &self.tools_file)
            .field("seed_demo", &self.seed_demo)
            .field("auto_create", &self.auto_create)
            .field("lease_timeout", &self.lease_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("terminal_retention", &self.terminal_retention)
            .field("max_leases", &self.max_leases)
            .field("vendors", &vendors)
            .field("require_signatures", &self.require_signatures)
            .field("signature_window_secs", &self.signature_window_secs)
            .field("default_vendor", &self.default_vendor)
            .field("app_version", &self.app_version)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("metrics_enabled", &self.metrics_enabled)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auth_token: None,
            tools_file: None,
            seed_demo: true,
            auto_create: None,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            terminal_retention: DEFAULT_TERMINAL_RETENTION,
            max_leases: DEFAULT_MAX_LEASES,
            vendor_secrets: Vec::new(),
            require_signatures: false,
            signature_window_secs: DEFAULT_SIGNATURE_WINDOW_SECS,
            default_vendor: DEFAULT_VENDOR.to_string(),
            app_version: "dev".to_string(),
            database_url: None,
            metrics_enabled: true,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let auto_create = if parse_or(&get, "LICD_AUTO_CREATE_TOOLS", false)? {
            let total = parse_or(&get, "LICD_DEFAULT_TOTAL", 10u32)?;
            let commit = parse_or(&get, "LICD_DEFAULT_COMMIT", total)?;
            let max_overage = parse_or(&get, "LICD_DEFAULT_MAX_OVERAGE", 0u32)?;
            let config = PoolConfig::new(total, commit, max_overage);
            if let Some(problem) = config.problems().into_iter().next() {
                return Err(ConfigError {
                    var: "LICD_DEFAULT_TOTAL",
                    value: format!("total={total} commit={commit} max_overage={max_overage}"),
                    reason: problem,
                });
            }
            Some(config)
        } else {
            None
        };

        let config = Self {
            port: parse_or(&get, "PORT", defaults.port)?,
            auth_token: get("AUTH_TOKEN"),
            tools_file: get("LICD_TOOLS_FILE").map(PathBuf::from),
            seed_demo: parse_or(&get, "LICD_SEED", defaults.seed_demo)?,
            auto_create,
            lease_timeout: secs_or(&get, "LICD_LEASE_TIMEOUT_SECS", defaults.lease_timeout)?,
            sweep_interval: secs_or(&get, "LICD_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            terminal_retention: secs_or(
                &get,
                "LICD_TERMINAL_RETENTION_SECS",
                defaults.terminal_retention,
            )?,
            max_leases: parse_or(&get, "LICD_MAX_LEASES", defaults.max_leases)?,
            vendor_secrets: match get("LICD_VENDOR_SECRETS") {
                Some(raw) => parse_vendor_secrets(&raw)?,
                None => Vec::new(),
            },
            require_signatures: parse_or(&get, "LICD_REQUIRE_SIGNATURES", false)?,
            signature_window_secs: parse_or(
                &get,
                "LICD_SIGNATURE_WINDOW_SECS",
                defaults.signature_window_secs,
            )?,
            default_vendor: get("LICD_DEFAULT_VENDOR").unwrap_or(defaults.default_vendor),
            app_version: get("APP_VERSION").unwrap_or(defaults.app_version),
            database_url: get("DATABASE_URL"),
            metrics_enabled: parse_or(&get, "LICD_METRICS_ENABLED", defaults.metrics_enabled)?,
            log_json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        };

        if config.sweep_interval.is_zero() {
            return Err(ConfigError {
                var: "LICD_SWEEP_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if config.lease_timeout.is_zero() {
            return Err(ConfigError {
                var: "LICD_LEASE_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if config.max_leases == 0 {
            return Err(ConfigError {
                var: "LICD_MAX_LEASES",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if config.require_signatures && config.vendor_secrets.is_empty() {
            return Err(ConfigError {
                var: "LICD_REQUIRE_SIGNATURES",
                value: "true".into(),
                reason: "signatures are required but LICD_VENDOR_SECRETS is empty".into(),
            });
        }
        Ok(config)
    }

    /// Parameters of the coordinator core.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            default_lease_timeout: self.lease_timeout,
            terminal_retention: self.terminal_retention,
            max_leases: self.max_leases,
            auto_create: self.auto_create.clone(),
        }
    }

    /// The request-signature verifier described by this configuration.
    pub fn verifier(&self) -> HmacVerifier {
        self.vendor_secrets.iter().fold(
            HmacVerifier::new(self.default_vendor.clone())
                .require_signatures(self.require_signatures)
                .window_secs(self.signature_window_secs),
            |verifier, (vendor, secret)| verifier.with_vendor(vendor.clone(), secret.clone()),
        )
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn secs_or<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, var, default.as_secs()).map(Duration::from_secs)
}

/// Parse `vendor=secret,vendor2=secret2`.
fn parse_vendor_secrets(raw: &str) -> Result<Vec<(String, VendorSecret)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((vendor, secret)) if !vendor.trim().is_empty() && !secret.is_empty() => {
                Ok((vendor.trim().to_string(), VendorSecret::new(secret.as_bytes())))
            }
            _ => Err(ConfigError {
                var: "LICD_VENDOR_SECRETS",
                value: "[REDACTED]".into(),
                reason: "expected comma-separated vendor=secret pairs".into(),
            }),
        })
        .collect()
}
