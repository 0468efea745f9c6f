use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::throttle::ThrottlePolicy;
use crate::vault::MIN_PBKDF2_ITERATIONS;

const ENV_SELECTOR: &str = "EXTWALLET_ENVIRONMENT";
const ENV_MAX_ATTEMPTS: &str = "EXTWALLET_MAX_FAILED_ATTEMPTS";
const ENV_LOCKOUT_MINUTES: &str = "EXTWALLET_LOCKOUT_MINUTES";
const ENV_SESSION_MINUTES: &str = "EXTWALLET_SESSION_TIMEOUT_MINUTES";
const ENV_KDF_ITERATIONS: &str = "EXTWALLET_KDF_ITERATIONS";

/// Upper bound for `lockout_minutes`: one day.
pub const MAX_LOCKOUT_MINUTES: u64 = 24 * 60;
/// Upper bound for `session_timeout_minutes`: one day.
pub const MAX_SESSION_TIMEOUT_MINUTES: u64 = 24 * 60;

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    /// Reads `EXTWALLET_ENVIRONMENT`, defaulting to production.
    pub fn from_env() -> Self {
        std::env::var(ENV_SELECTOR)
            .map(|value| Self::parse(&value))
            .unwrap_or(Environment::Production)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" | "testing" => Environment::Test,
            _ => Environment::Production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

/// Throttle limits, session lifetime and KDF cost for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub max_failed_attempts: u32,
    pub lockout_minutes: u64,
    pub session_timeout_minutes: u64,
    pub kdf_iterations: u32,
}

impl SecurityPolicy {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                max_failed_attempts: 5,
                lockout_minutes: 15,
                session_timeout_minutes: 30,
                kdf_iterations: 210_000,
            },
            Environment::Development => Self {
                max_failed_attempts: 10,
                lockout_minutes: 5,
                session_timeout_minutes: 60,
                kdf_iterations: MIN_PBKDF2_ITERATIONS,
            },
            Environment::Test => Self {
                max_failed_attempts: 3,
                lockout_minutes: 1,
                session_timeout_minutes: 5,
                kdf_iterations: MIN_PBKDF2_ITERATIONS,
            },
        }
    }

    /// Environment defaults with `EXTWALLET_*` overrides applied.
    pub fn from_environment(environment: Environment) -> WalletResult<Self> {
        Self::resolve(environment, &PolicyOverrides::default())
    }

    /// Environment defaults, then persisted overrides, then `EXTWALLET_*`
    /// variables.
    pub fn resolve(environment: Environment, overrides: &PolicyOverrides) -> WalletResult<Self> {
        let mut policy = Self::for_environment(environment);
        overrides.apply(&mut policy);
        policy.apply_env_overrides()?;
        policy.validate()?;
        log::info!("Security policy initialized for {} environment", environment.as_str());
        Ok(policy)
    }

    pub fn validate(&self) -> WalletResult<()> {
        if self.max_failed_attempts == 0 {
            return Err(WalletError::ValidationError(
                "Max failed attempts must be at least 1".to_string(),
            ));
        }
        if self.session_timeout_minutes == 0 {
            return Err(WalletError::ValidationError(
                "Session timeout must be at least one minute".to_string(),
            ));
        }
        if self.session_timeout_minutes > MAX_SESSION_TIMEOUT_MINUTES {
            return Err(WalletError::ValidationError(format!(
                "Session timeout must be at most {} minutes",
                MAX_SESSION_TIMEOUT_MINUTES
            )));
        }
        if self.lockout_minutes > MAX_LOCKOUT_MINUTES {
            return Err(WalletError::ValidationError(format!(
                "Lockout must be at most {} minutes",
                MAX_LOCKOUT_MINUTES
            )));
        }
        if self.kdf_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(WalletError::ValidationError(format!(
                "KDF iterations must be at least {}",
                MIN_PBKDF2_ITERATIONS
            )));
        }
        Ok(())
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: self.max_failed_attempts,
            lockout_duration: minutes(self.lockout_minutes),
            session_timeout: minutes(self.session_timeout_minutes),
        }
    }

    fn apply_env_overrides(&mut self) -> WalletResult<()> {
        if let Some(value) = read_env(ENV_MAX_ATTEMPTS) {
            self.max_failed_attempts = parse_number(&value, ENV_MAX_ATTEMPTS)?;
        }
        if let Some(value) = read_env(ENV_LOCKOUT_MINUTES) {
            self.lockout_minutes = parse_number(&value, ENV_LOCKOUT_MINUTES)?;
        }
        if let Some(value) = read_env(ENV_SESSION_MINUTES) {
            self.session_timeout_minutes = parse_number(&value, ENV_SESSION_MINUTES)?;
        }
        if let Some(value) = read_env(ENV_KDF_ITERATIONS) {
            self.kdf_iterations = parse_number(&value, ENV_KDF_ITERATIONS)?;
        }
        Ok(())
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::for_environment(Environment::Production)
    }
}

/// Per-install adjustments stored in the wallet config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failed_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,
}

impl PolicyOverrides {
    /// Rejects override values no environment would accept.
    pub fn validate(&self) -> WalletResult<()> {
        let mut policy = SecurityPolicy::for_environment(Environment::Production);
        self.apply(&mut policy);
        policy.validate()
    }

    pub fn apply(&self, policy: &mut SecurityPolicy) {
        if let Some(value) = self.max_failed_attempts {
            policy.max_failed_attempts = value;
        }
        if let Some(value) = self.lockout_minutes {
            policy.lockout_minutes = value;
        }
        if let Some(value) = self.session_timeout_minutes {
            policy.session_timeout_minutes = value;
        }
        if let Some(value) = self.kdf_iterations {
            policy.kdf_iterations = value;
        }
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

fn read_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    accept_override(name, value)
}

/// Drops override values that are blank or carry control characters.
fn accept_override(name: &str, value: String) -> Option<String> {
    if value.trim().is_empty() {
        log::warn!("Environment variable {} is empty, ignoring", name);
        return None;
    }
    if value.chars().any(|c| c.is_control()) {
        log::warn!(
            "Environment variable {} contains control characters, ignoring",
            name
        );
        return None;
    }
    log::debug!("Loaded security override from {}", name);
    Some(value)
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> WalletResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        WalletError::ValidationError(format!("Invalid numeric value '{}' for {}", value, name))
    })
}
