//! Plan-wide settings, loadable from TOML.
//!
//! ```
//! use meridian_core::config::PlanConfig;
//!
//! let config = PlanConfig::from_toml_str(r#"
//!     name = "spring"
//!     current = "2024-03-01T00:00:00"
//!
//!     [problems]
//!     late_tolerance_days = 1
//! "#).unwrap();
//!
//! assert_eq!(config.name, "spring");
//! assert_eq!(config.problems.late_tolerance_days, 1);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::{Date, Duration};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub name: String,
    /// The "now" of the plan. Operationplans starting before it are flagged.
    pub current: Date,
    pub problems: ProblemConfig,
    pub setup: SetupConfig,
    /// Merge identical unlocked fixed-time plans on activation.
    pub merge_on_activate: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            name: "plan".to_string(),
            current: Date::EPOCH,
            problems: ProblemConfig::default(),
            setup: SetupConfig::default(),
            merge_on_activate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemConfig {
    /// Whether new entities detect problems.
    pub detect_by_default: bool,
    /// Deliveries later than this are not reported as late.
    pub late_tolerance_days: i64,
    /// Deliveries earlier than this are not reported as early.
    pub early_tolerance_days: i64,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self { detect_by_default: true, late_tolerance_days: 0, early_tolerance_days: 0 }
    }
}

impl ProblemConfig {
    pub fn late_tolerance(&self) -> Duration {
        Duration::days(self.late_tolerance_days)
    }

    pub fn early_tolerance(&self) -> Duration {
        Duration::days(self.early_tolerance_days)
    }
}

/// Fallback changeover used when a setup matrix has no matching rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub missing_rule_days: i64,
    pub missing_rule_cost: f64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self { missing_rule_days: 365, missing_rule_cost: 1e9 }
    }
}

impl PlanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file doesn't exist, contains invalid TOML, or
    /// holds out-of-range values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PlanConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.problems.late_tolerance_days < 0 || self.problems.early_tolerance_days < 0 {
            return Err(ConfigError::Invalid("problem tolerances must not be negative".into()));
        }
        if self.setup.missing_rule_days < 0 {
            return Err(ConfigError::Invalid("setup fallback duration must not be negative".into()));
        }
        Ok(())
    }

    pub fn with_current(mut self, current: Date) -> Self {
        self.current = current;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = PlanConfig::from_toml_str("").unwrap();
        assert!(config.problems.detect_by_default);
        assert_eq!(config.setup.missing_rule_days, 365);
        assert!(config.merge_on_activate);
    }

    #[test]
    fn parses_current_date() {
        let config = PlanConfig::from_toml_str(r#"current = "2024-01-02""#).unwrap();
        assert_eq!(config.current, Date::from_ymd(2024, 1, 2).unwrap());
    }

    #[test]
    fn rejects_negative_tolerance() {
        let err = PlanConfig::from_toml_str(
            r#"
            [problems]
            late_tolerance_days = -1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_date() {
        let err = PlanConfig::from_toml_str(r#"current = "yesterday""#).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PlanConfig::load("/nonexistent/meridian.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
