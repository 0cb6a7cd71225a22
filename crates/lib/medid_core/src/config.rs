//! Emergency access configuration.

use std::time::Duration;

use thiserror::Error;

use crate::emergency::models::EmergencyLevel;

/// Default emergency window: 15 minutes.
pub const DEFAULT_EMERGENCY_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Default bound on each collaborator or log store call.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// What to do when a scanned code cannot be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MalformedScanPolicy {
    /// Fail issuance with `MalformedScanCode`.
    #[default]
    Reject,
    /// Continue with a fixed masked id. Can grant access to the wrong
    /// record; exists for hosts that must always produce a handle.
    Placeholder(String),
}

/// How `verify_and_access` decides a presented token is genuine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenVerification {
    /// Accept any well-formed, unexpired token structure.
    #[default]
    TrustStructure,
    /// Accept only tokens this controller issued, unmodified.
    Registry,
}

/// Configuration for the emergency access controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyConfig {
    /// How long an issued token stays valid.
    pub emergency_window: Duration,
    /// Bound on each collaborator call and each log append.
    pub collaborator_timeout: Duration,
    /// Level stamped on issued tokens.
    pub default_emergency_level: EmergencyLevel,
    pub malformed_scan_policy: MalformedScanPolicy,
    pub token_verification: TokenVerification,
    /// Permit non-cryptographic token values when the OS entropy source
    /// fails. Off by default.
    pub allow_weak_token_fallback: bool,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            emergency_window: DEFAULT_EMERGENCY_WINDOW,
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            default_emergency_level: EmergencyLevel::Critical,
            malformed_scan_policy: MalformedScanPolicy::Reject,
            token_verification: TokenVerification::TrustStructure,
            allow_weak_token_fallback: false,
        }
    }
}

impl EmergencyConfig {
    /// Reads configuration from environment variables, falling back to the
    /// defaults.
    ///
    /// | Variable                        | Default           |
    /// |---------------------------------|-------------------|
    /// | `MEDID_EMERGENCY_WINDOW_SECS`   | `900`             |
    /// | `MEDID_COLLABORATOR_TIMEOUT_MS` | `5000`            |
    /// | `MEDID_EMERGENCY_LEVEL`         | `critical`        |
    /// | `MEDID_SCAN_PLACEHOLDER`        | unset (reject)    |
    /// | `MEDID_STRICT_TOKENS`           | `false`           |
    /// | `MEDID_ALLOW_WEAK_TOKENS`       | `false`           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("MEDID_EMERGENCY_WINDOW_SECS") {
            config.emergency_window =
                Duration::from_secs(parse_positive("MEDID_EMERGENCY_WINDOW_SECS", &v)?);
        }
        if let Some(v) = lookup("MEDID_COLLABORATOR_TIMEOUT_MS") {
            config.collaborator_timeout =
                Duration::from_millis(parse_positive("MEDID_COLLABORATOR_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("MEDID_EMERGENCY_LEVEL") {
            config.default_emergency_level = v
                .parse()
                .map_err(|reason| invalid("MEDID_EMERGENCY_LEVEL", &v, reason))?;
        }
        if let Some(v) = lookup("MEDID_SCAN_PLACEHOLDER")
            && !v.trim().is_empty()
        {
            config.malformed_scan_policy = MalformedScanPolicy::Placeholder(v.trim().to_string());
        }
        if let Some(v) = lookup("MEDID_STRICT_TOKENS")
            && parse_bool("MEDID_STRICT_TOKENS", &v)?
        {
            config.token_verification = TokenVerification::Registry;
        }
        if let Some(v) = lookup("MEDID_ALLOW_WEAK_TOKENS") {
            config.allow_weak_token_fallback = parse_bool("MEDID_ALLOW_WEAK_TOKENS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emergency_window.is_zero() {
            return Err(invalid(
                "emergency_window",
                "0s",
                "must be greater than zero".into(),
            ));
        }
        if chrono::Duration::from_std(self.emergency_window).is_err() {
            return Err(invalid(
                "emergency_window",
                &format!("{:?}", self.emergency_window),
                "out of range".into(),
            ));
        }
        if self.collaborator_timeout.is_zero() {
            return Err(invalid(
                "collaborator_timeout",
                "0s",
                "must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(key, value, "must be greater than zero".into())),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(key, value, e.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean".into())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = EmergencyConfig::default();
        assert_eq!(config.emergency_window, Duration::from_secs(900));
        assert_eq!(config.default_emergency_level, EmergencyLevel::Critical);
        assert_eq!(config.malformed_scan_policy, MalformedScanPolicy::Reject);
        assert_eq!(config.token_verification, TokenVerification::TrustStructure);
        assert!(!config.allow_weak_token_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EmergencyConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EmergencyConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = EmergencyConfig::from_lookup(lookup(&[
            ("MEDID_EMERGENCY_WINDOW_SECS", "600"),
            ("MEDID_COLLABORATOR_TIMEOUT_MS", "250"),
            ("MEDID_EMERGENCY_LEVEL", "high"),
            ("MEDID_SCAN_PLACEHOLDER", "PAT001"),
            ("MEDID_STRICT_TOKENS", "true"),
            ("MEDID_ALLOW_WEAK_TOKENS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.emergency_window, Duration::from_secs(600));
        assert_eq!(config.collaborator_timeout, Duration::from_millis(250));
        assert_eq!(config.default_emergency_level, EmergencyLevel::High);
        assert_eq!(
            config.malformed_scan_policy,
            MalformedScanPolicy::Placeholder("PAT001".into())
        );
        assert_eq!(config.token_verification, TokenVerification::Registry);
        assert!(config.allow_weak_token_fallback);
    }

    #[test]
    fn zero_window_is_invalid() {
        let err =
            EmergencyConfig::from_lookup(lookup(&[("MEDID_EMERGENCY_WINDOW_SECS", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "MEDID_EMERGENCY_WINDOW_SECS"));
    }

    #[test]
    fn garbage_values_are_invalid() {
        assert!(
            EmergencyConfig::from_lookup(lookup(&[("MEDID_COLLABORATOR_TIMEOUT_MS", "soon")]))
                .is_err()
        );
        assert!(EmergencyConfig::from_lookup(lookup(&[("MEDID_STRICT_TOKENS", "maybe")])).is_err());
        assert!(EmergencyConfig::from_lookup(lookup(&[("MEDID_EMERGENCY_LEVEL", "mild")])).is_err());
    }

    #[test]
    fn blank_placeholder_keeps_reject_policy() {
        let config =
            EmergencyConfig::from_lookup(lookup(&[("MEDID_SCAN_PLACEHOLDER", "  ")])).unwrap();
        assert_eq!(config.malformed_scan_policy, MalformedScanPolicy::Reject);
    }
}
