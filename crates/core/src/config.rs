//! Deployment configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use validator::{Validate, ValidationError};

use crate::error::DeployError;

pub const DEFAULT_PROCESS_NAME: &str = "cytotoxic-scheduler";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_DESCRIPTOR_FILE: &str = "ecosystem.config.json";
pub const DEFAULT_PLACEHOLDER: &str = "/path/to/allergy-cytotoxic";
pub const DEFAULT_VERIFY_DELAY_SECS: u64 = 3;
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;

/// Settings for one deploy run.
///
/// All fields have defaults matching the scheduler's stock deployment;
/// override via environment variables (or a `.env` file).
#[derive(Debug, Clone, Validate)]
pub struct DeployConfig {
    /// Explicit application root; resolved from the executable location when `None`.
    pub app_dir: Option<PathBuf>,
    /// Name of the supervised process (default: `cytotoxic-scheduler`).
    #[validate(custom(function = "validate_process_name"))]
    pub process_name: String,
    /// Listening port of the application (default: `8501`).
    #[validate(range(min = 1))]
    pub port: u16,
    /// Listening address written into a generated descriptor (default:
    /// `0.0.0.0`). An existing descriptor's `--server.address` wins.
    #[validate(length(min = 1))]
    pub address: String,
    /// Process descriptor file name, relative to the app dir.
    #[validate(length(min = 1))]
    pub descriptor_file: String,
    /// Path token in the checked-in descriptor replaced by the app dir.
    #[validate(length(min = 1))]
    pub placeholder: String,
    /// Fixed delay before the single post-launch status check.
    #[validate(range(max = 300))]
    pub verify_delay_secs: u64,
    /// Upper bound for any single installer or dependency-sync command.
    #[validate(range(min = 1))]
    pub install_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app_dir: None,
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS.to_string(),
            descriptor_file: DEFAULT_DESCRIPTOR_FILE.to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            verify_delay_secs: DEFAULT_VERIFY_DELAY_SECS,
            install_timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
        }
    }
}

impl DeployConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                      |
    /// |--------------------------|------------------------------|
    /// | `APP_DIR`                | resolved from executable     |
    /// | `PROCESS_NAME`           | `cytotoxic-scheduler`        |
    /// | `APP_PORT`               | `8501`                       |
    /// | `APP_ADDRESS`            | `0.0.0.0`                    |
    /// | `DESCRIPTOR_FILE`        | `ecosystem.config.json`      |
    /// | `DESCRIPTOR_PLACEHOLDER` | `/path/to/allergy-cytotoxic` |
    /// | `VERIFY_DELAY_SECS`      | `3`                          |
    /// | `INSTALL_TIMEOUT_SECS`   | `600`                        |
    pub fn from_env() -> Result<Self, DeployError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            app_dir: var("APP_DIR").map(PathBuf::from),
            process_name: var("PROCESS_NAME").unwrap_or(defaults.process_name),
            port: parse_or("APP_PORT", var("APP_PORT"), defaults.port)?,
            address: var("APP_ADDRESS").unwrap_or(defaults.address),
            descriptor_file: var("DESCRIPTOR_FILE").unwrap_or(defaults.descriptor_file),
            placeholder: var("DESCRIPTOR_PLACEHOLDER").unwrap_or(defaults.placeholder),
            verify_delay_secs: parse_or(
                "VERIFY_DELAY_SECS",
                var("VERIFY_DELAY_SECS"),
                defaults.verify_delay_secs,
            )?,
            install_timeout_secs: parse_or(
                "INSTALL_TIMEOUT_SECS",
                var("INSTALL_TIMEOUT_SECS"),
                defaults.install_timeout_secs,
            )?,
        };

        config
            .validate()
            .map_err(|e| DeployError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, DeployError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| DeployError::Config(format!("{key} must be a number, got '{value}'"))),
        None => Ok(default),
    }
}

/// Allowed process name characters: alphanumeric, hyphen, underscore, dot.
/// The name is passed to the supervisor CLI as an argument, where `all` and
/// numeric ids select other processes, so those are rejected too.
pub(crate) fn is_safe_process_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.eq_ignore_ascii_case("all")
        && !name.chars().all(|c| c.is_ascii_digit())
}

fn validate_process_name(name: &str) -> Result<(), ValidationError> {
    if is_safe_process_name(name) {
        Ok(())
    } else {
        Err(ValidationError::new("process_name"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
