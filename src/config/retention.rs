//! Bandwidth sample retention configuration.
//!
//! Samples whose day falls before `today - horizon_days` are purged by a
//! background sweeper that wakes at a random point between the minimum and
//! maximum interval, so a fleet of metering nodes does not sweep in lockstep.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! horizon_days = 100
//! min_interval_hours = 24
//! max_interval_hours = 48
//!
//! [retention.safety]
//! dry_run = false
//! max_deletes_per_run = 0
//! batch_size = 10000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Sample retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the background sweeper runs.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days of samples to keep. A sample dated exactly `today - horizon_days`
    /// is kept; anything older is deleted.
    /// Default: 100
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    /// Lower bound of the randomized sweep interval (in hours).
    #[serde(default = "default_min_interval_hours")]
    pub min_interval_hours: u64,

    /// Upper bound of the randomized sweep interval (in hours).
    #[serde(default = "default_max_interval_hours")]
    pub max_interval_hours: u64,

    /// Safety settings for delete operations.
    #[serde(default)]
    pub safety: RetentionSafety,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_days: default_horizon_days(),
            min_interval_hours: default_min_interval_hours(),
            max_interval_hours: default_max_interval_hours(),
            safety: RetentionSafety::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_horizon_days() -> u32 {
    100
}

fn default_min_interval_hours() -> u64 {
    24
}

fn default_max_interval_hours() -> u64 {
    48
}

/// Safety settings for retention operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// If true, count what would be deleted without deleting.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of rows to delete per sweep per partition table.
    /// Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_deletes_per_run: u64,

    /// Rows removed per delete statement.
    /// Default: 10000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for RetentionSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_deletes_per_run: 0,
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> u32 {
    10_000
}

impl RetentionSafety {
    /// Per-table delete cap, with 0 meaning unlimited.
    pub fn max_deletes(&self) -> u64 {
        if self.max_deletes_per_run == 0 {
            u64::MAX
        } else {
            self.max_deletes_per_run
        }
    }
}

impl RetentionConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_hours * 3600)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_hours * 3600)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_days == 0 {
            return Err(ConfigError::Validation(
                "retention.horizon_days must be at least 1".into(),
            ));
        }
        if self.min_interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.min_interval_hours must be at least 1".into(),
            ));
        }
        if self.min_interval_hours > self.max_interval_hours {
            return Err(ConfigError::Validation(
                "retention.min_interval_hours cannot exceed max_interval_hours".into(),
            ));
        }
        if self.safety.batch_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.horizon_days, 100);
        assert_eq!(config.min_interval(), Duration::from_secs(24 * 3600));
        assert_eq!(config.max_interval(), Duration::from_secs(48 * 3600));
        assert!(!config.safety.dry_run);
        assert_eq!(config.safety.max_deletes(), u64::MAX);
        assert_eq!(config.safety.batch_size, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = false
            horizon_days = 30
            min_interval_hours = 1
            max_interval_hours = 2

            [safety]
            dry_run = true
            max_deletes_per_run = 500
            batch_size = 100
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.horizon_days, 30);
        assert_eq!(config.min_interval_hours, 1);
        assert_eq!(config.max_interval_hours, 2);
        assert!(config.safety.dry_run);
        assert_eq!(config.safety.max_deletes(), 500);
        assert_eq!(config.safety.batch_size, 100);
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let config: RetentionConfig = toml::from_str(
            r#"
            min_interval_hours = 48
            max_interval_hours = 24
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let config: RetentionConfig = toml::from_str("horizon_days = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<RetentionConfig, _> = toml::from_str("interval_hours = 24");
        assert!(result.is_err());
    }
}
