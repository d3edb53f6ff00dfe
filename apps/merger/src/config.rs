//! Configuration resolution.
//!
//! Priority order, highest first:
//! 1. Command-line flag
//! 2. Environment variable (`UTTER_*`, handled by clap)
//! 3. TOML config file (`--config`, else `<config_dir>/utter/config.toml`)
//! 4. Compiled default

use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use utter_merge::{DriverSettings, MergeSettings, SettingsError};

const APP_DIR: &str = "utter";
const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "merger.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Invalid(#[from] SettingsError),
}

/// Which enrichment capability finalized lines go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnricherKind {
    /// Finalize raw text only.
    None,
    /// Local filler removal, punctuation and tagging.
    #[default]
    Rules,
}

/// Contents of the TOML config file. Every field is optional.
///
/// ```toml
/// database = "/var/lib/utter/merger.db"
/// enricher = "rules"
///
/// [merge]
/// merge_window_ms = 8000
/// idle_finalize_ms = 5000
///
/// [driver]
/// poll_interval_ms = 500
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub enricher: Option<EnricherKind>,
    pub merge: MergeSettings,
    pub driver: DriverSettings,
}

impl FileConfig {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given (it must exist), otherwise the per-user
    /// config file if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::parse(&path, &contents)
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub enricher: Option<EnricherKind>,
    pub merge_window_ms: Option<u64>,
    pub idle_finalize_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database: PathBuf,
    pub enricher: EnricherKind,
    pub merge: MergeSettings,
    pub driver: DriverSettings,
}

impl Config {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut merge = file.merge;
        if let Some(ms) = overrides.merge_window_ms {
            merge.merge_window_ms = ms;
        }
        if let Some(ms) = overrides.idle_finalize_ms {
            merge.idle_finalize_ms = Some(ms);
        }

        let mut driver = file.driver;
        if let Some(ms) = overrides.poll_interval_ms {
            driver.poll_interval_ms = ms;
        }

        merge.validate()?;
        driver.validate()?;

        Ok(Self {
            database: overrides
                .database
                .or(file.database)
                .unwrap_or_else(default_database_path),
            enricher: overrides.enricher.or(file.enricher).unwrap_or_default(),
            merge,
            driver,
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// `<data_local_dir>/utter/merger.db`, or the working directory when the
/// platform has no data directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join(DATABASE_FILE))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file_or_overrides() {
        let config = Config::resolve(FileConfig::default(), Overrides::default()).unwrap();
        assert_eq!(config.merge, MergeSettings::default());
        assert_eq!(config.driver, DriverSettings::default());
        assert_eq!(config.enricher, EnricherKind::Rules);
        assert!(config.database.ends_with(DATABASE_FILE));
    }

    #[test]
    fn test_file_values_apply() {
        let file = FileConfig::parse(
            Path::new("test.toml"),
            r#"
            database = "/tmp/lines.db"
            enricher = "none"

            [merge]
            merge_window_ms = 12000

            [driver]
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::resolve(file, Overrides::default()).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/lines.db"));
        assert_eq!(config.enricher, EnricherKind::None);
        assert_eq!(config.merge.merge_window_ms, 12000);
        assert_eq!(config.merge.idle_finalize_ms, None);
        assert_eq!(config.driver.poll_interval_ms, 250);
    }

    #[test]
    fn test_overrides_beat_file() {
        let file = FileConfig::parse(
            Path::new("test.toml"),
            "database = \"/tmp/file.db\"\n[merge]\nmerge_window_ms = 12000\n",
        )
        .unwrap();
        let overrides = Overrides {
            database: Some(PathBuf::from("/tmp/cli.db")),
            merge_window_ms: Some(9000),
            idle_finalize_ms: Some(4000),
            ..Overrides::default()
        };

        let config = Config::resolve(file, overrides).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/cli.db"));
        assert_eq!(config.merge.merge_window_ms, 9000);
        assert_eq!(config.merge.idle_finalize_ms, Some(4000));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let overrides = Overrides {
            poll_interval_ms: Some(0),
            ..Overrides::default()
        };
        let result = Config::resolve(FileConfig::default(), overrides);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid(SettingsError::ZeroPollInterval))
        ));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = FileConfig::parse(Path::new("bad.toml"), "merge_windw_ms = 5\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            FileConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[merge]\nidle_finalize_ms = 5000\n").unwrap();

        let file = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(file.merge.idle_finalize_ms, Some(5000));
        assert_eq!(file.merge.merge_window_ms, utter_merge::DEFAULT_MERGE_WINDOW_MS);
    }
}
