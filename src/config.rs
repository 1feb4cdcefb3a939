//! Engine configuration loaded from `LEADFLOW_*` environment variables.

use std::env;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use crate::Credits;

const PREFIX: &str = "LEADFLOW_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LEADFLOW_{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Time a provider has to answer an offer.
    pub offer_window: Duration,
    /// Time without client contact after which a purchase is refunded.
    pub refund_window: Duration,
    /// Age at which an unconverted contacted purchase expires.
    pub purchase_expiry: Duration,
    pub sweep_interval: StdDuration,
    pub sweep_workers: usize,
    pub max_candidates: usize,
    pub base_lead_price: Credits,
    pub contact_unlock_price: Credits,
    /// Whether refunds also return the contact unlock spend.
    pub refund_includes_unlock: bool,
    /// Declined plus expired offers at which an exhausted job is flagged.
    pub revision_threshold: usize,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offer_window: Duration::hours(24),
            refund_window: Duration::hours(48),
            purchase_expiry: Duration::days(30),
            sweep_interval: StdDuration::from_secs(300),
            sweep_workers: 4,
            max_candidates: 10,
            base_lead_price: Credits::new(10),
            contact_unlock_price: Credits::new(1),
            refund_includes_unlock: false,
            revision_threshold: 3,
            log_level: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source; unset keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let offer_hours = positive(read("OFFER_WINDOW_HOURS"), "OFFER_WINDOW_HOURS", 24)?;
        let refund_hours = positive(read("REFUND_WINDOW_HOURS"), "REFUND_WINDOW_HOURS", 48)?;
        let expiry_days = positive(read("PURCHASE_EXPIRY_DAYS"), "PURCHASE_EXPIRY_DAYS", 30)?;
        let interval = positive(read("SWEEP_INTERVAL_SECS"), "SWEEP_INTERVAL_SECS", 300)?;
        let workers = positive(read("SWEEP_WORKERS"), "SWEEP_WORKERS", 4)?;
        let max_candidates = positive(read("MAX_CANDIDATES"), "MAX_CANDIDATES", 10)?;
        let base_price = positive(read("BASE_LEAD_PRICE"), "BASE_LEAD_PRICE", 10)?;
        let unlock_price = positive(read("CONTACT_UNLOCK_PRICE"), "CONTACT_UNLOCK_PRICE", 1)?;
        let revision_threshold = positive(read("REVISION_THRESHOLD"), "REVISION_THRESHOLD", 3)?;

        let refund_includes_unlock = match read("REFUND_INCLUDES_UNLOCK") {
            None => defaults.refund_includes_unlock,
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                name: "REFUND_INCLUDES_UNLOCK",
                expected: "a boolean",
                value,
            })?,
        };

        Ok(Self {
            offer_window: Duration::hours(offer_hours as i64),
            refund_window: Duration::hours(refund_hours as i64),
            purchase_expiry: Duration::days(expiry_days as i64),
            sweep_interval: StdDuration::from_secs(interval),
            sweep_workers: workers as usize,
            max_candidates: max_candidates as usize,
            base_lead_price: Credits::new(base_price as i64),
            contact_unlock_price: Credits::new(unlock_price as i64),
            refund_includes_unlock,
            revision_threshold: revision_threshold as usize,
            log_level: read("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn positive(value: Option<String>, name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(u64::from(parsed)),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a positive integer",
            value,
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.offer_window, Duration::hours(24));
        assert_eq!(config.refund_window, Duration::hours(48));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("OFFER_WINDOW_HOURS", "12"),
            ("SWEEP_INTERVAL_SECS", " 60 "),
            ("SWEEP_WORKERS", "8"),
            ("BASE_LEAD_PRICE", "20"),
            ("REFUND_INCLUDES_UNLOCK", "yes"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(config.offer_window, Duration::hours(12));
        assert_eq!(config.sweep_interval, StdDuration::from_secs(60));
        assert_eq!(config.sweep_workers, 8);
        assert_eq!(config.base_lead_price, Credits::new(20));
        assert!(config.refund_includes_unlock);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = load(&[("MAX_CANDIDATES", "  ")]).unwrap();
        assert_eq!(config.max_candidates, 10);
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert_eq!(
            load(&[("SWEEP_WORKERS", "0")]),
            Err(ConfigError::Invalid {
                name: "SWEEP_WORKERS",
                expected: "a positive integer",
                value: "0".to_string(),
            })
        );
        assert!(load(&[("REFUND_WINDOW_HOURS", "two days")]).is_err());
        assert!(load(&[("REFUND_INCLUDES_UNLOCK", "maybe")]).is_err());
    }

    #[test]
    fn error_message_names_the_variable() {
        let err = load(&[("MAX_CANDIDATES", "-1")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "LEADFLOW_MAX_CANDIDATES must be a positive integer, got '-1'"
        );
    }
}
