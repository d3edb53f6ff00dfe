//! Merge and polling parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default inactivity gap under which same-speaker fragments are merged.
pub const DEFAULT_MERGE_WINDOW_MS: u64 = 8000;

/// Default interval between queue drains.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("merge window must be greater than zero")]
    ZeroMergeWindow,
    #[error("idle finalize threshold must be greater than zero")]
    ZeroIdleThreshold,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// Merge engine settings.
///
/// No cap on how long a line may keep growing while
/// activity continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Maximum wall-clock gap since the last merge for a fragment to extend
    /// the active line.
    pub merge_window_ms: u64,
    /// Inactivity after which the active line is closed. Falls back to the
    /// merge window when unset.
    pub idle_finalize_ms: Option<u64>,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            merge_window_ms: DEFAULT_MERGE_WINDOW_MS,
            idle_finalize_ms: None,
        }
    }
}

impl MergeSettings {
    pub fn with_merge_window_ms(merge_window_ms: u64) -> Self {
        Self {
            merge_window_ms,
            ..Self::default()
        }
    }

    pub fn merge_window(&self) -> Duration {
        Duration::from_millis(self.merge_window_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_finalize_ms.unwrap_or(self.merge_window_ms))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.merge_window_ms == 0 {
            return Err(SettingsError::ZeroMergeWindow);
        }
        if self.idle_finalize_ms == Some(0) {
            return Err(SettingsError::ZeroIdleThreshold);
        }
        Ok(())
    }
}

/// Poll driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub poll_interval_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DriverSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::ZeroPollInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_threshold_defaults_to_merge_window() {
        let settings = MergeSettings::with_merge_window_ms(12_000);
        assert_eq!(settings.idle_threshold(), Duration::from_secs(12));

        let separate = MergeSettings {
            idle_finalize_ms: Some(5000),
            ..settings
        };
        assert_eq!(separate.idle_threshold(), Duration::from_secs(5));
        assert_eq!(separate.merge_window(), Duration::from_secs(12));
    }

    #[test]
    fn test_validation_rejects_zero() {
        assert_eq!(
            MergeSettings::with_merge_window_ms(0).validate(),
            Err(SettingsError::ZeroMergeWindow)
        );
        let zero_idle = MergeSettings {
            idle_finalize_ms: Some(0),
            ..MergeSettings::default()
        };
        assert_eq!(zero_idle.validate(), Err(SettingsError::ZeroIdleThreshold));
        assert_eq!(
            DriverSettings { poll_interval_ms: 0 }.validate(),
            Err(SettingsError::ZeroPollInterval)
        );
        assert!(MergeSettings::default().validate().is_ok());
        assert!(DriverSettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_style_deserialize_uses_defaults() {
        let settings: MergeSettings = serde_json::from_str(r#"{"idle_finalize_ms": 5000}"#).unwrap();
        assert_eq!(settings.merge_window_ms, DEFAULT_MERGE_WINDOW_MS);
        assert_eq!(settings.idle_finalize_ms, Some(5000));
    }
}
