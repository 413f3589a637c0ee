//! Runtime configuration, read from the environment.

use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
    /// Default page size for notification listings.
    pub notification_limit: usize,
    /// Upper bound on audit log query results.
    pub audit_limit: usize,
    /// Default number of months covered by report series.
    pub report_months: u32,
    /// Attempts at a version-guarded wallet append before giving up.
    pub cas_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            notification_limit: 50,
            audit_limit: 1000,
            report_months: 6,
            cas_retries: 8,
        }
    }
}

pub const MAX_NOTIFICATION_LIMIT: usize = 200;
pub const REPORT_MONTHS_RANGE: std::ops::RangeInclusive<u32> = 3..=12;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            log_filter: lookup("RUST_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_filter),
            notification_limit: parse_var(
                &lookup,
                "LEDGER_NOTIFICATION_LIMIT",
                defaults.notification_limit,
            )?,
            audit_limit: parse_var(&lookup, "LEDGER_AUDIT_LIMIT", defaults.audit_limit)?,
            report_months: parse_var(&lookup, "LEDGER_REPORT_MONTHS", defaults.report_months)?,
            cas_retries: parse_var(&lookup, "LEDGER_CAS_RETRIES", defaults.cas_retries)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_NOTIFICATION_LIMIT).contains(&self.notification_limit) {
            return Err(invalid(
                "LEDGER_NOTIFICATION_LIMIT",
                self.notification_limit,
                format!("must be between 1 and {MAX_NOTIFICATION_LIMIT}"),
            ));
        }
        if self.audit_limit == 0 {
            return Err(invalid("LEDGER_AUDIT_LIMIT", 0, "must be at least 1".into()));
        }
        if !REPORT_MONTHS_RANGE.contains(&self.report_months) {
            return Err(invalid(
                "LEDGER_REPORT_MONTHS",
                self.report_months,
                "must be between 3 and 12".into(),
            ));
        }
        if self.cas_retries == 0 {
            return Err(invalid("LEDGER_CAS_RETRIES", 0, "must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
