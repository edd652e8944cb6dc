use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StoreError};

pub const CACHE_DIR_ENV: &str = "DISTRICT_STORE_CACHE_DIR";

const APP_NAME: &str = "district-store";
const DEFAULT_MAX_SNAPSHOTS: usize = 30;
const DEFAULT_MAX_AGE_DAYS: u32 = 365;
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_root: PathBuf,
    /// `None` disables the count limit.
    pub max_snapshots: Option<usize>,
    /// `None` disables the age limit.
    pub max_age_days: Option<u32>,
}

/// Shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    cache_root: Option<PathBuf>,
    max_snapshots: Option<usize>,
    /// Human duration such as "90d" or "12w".
    max_age: Option<String>,
    max_age_days: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config::new(default_cache_root())
    }
}

impl Config {
    /// Config for `cache_root` with default retention.
    pub fn new(cache_root: PathBuf) -> Self {
        Config {
            cache_root,
            max_snapshots: Some(DEFAULT_MAX_SNAPSHOTS),
            max_age_days: Some(DEFAULT_MAX_AGE_DAYS),
        }
    }

    /// Defaults, then the config file, then the environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
                config.apply_toml(&contents)?;
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    if let Ok(contents) = fs::read_to_string(&default_path) {
                        config.apply_toml(&contents)?;
                    }
                }
            }
        }

        config.apply_env(std::env::var_os(CACHE_DIR_ENV));
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config = Config::default();
        config.apply_toml(contents)?;
        Ok(config)
    }

    fn apply_toml(&mut self, contents: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(contents).map_err(|e| StoreError::Config(e.to_string()))?;

        if let Some(cache_root) = file.cache_root {
            self.cache_root = cache_root;
        }
        if let Some(max) = file.max_snapshots {
            self.max_snapshots = (max > 0).then_some(max);
        }

        match (file.max_age, file.max_age_days) {
            (Some(_), Some(_)) => {
                return Err(StoreError::Config(
                    "set either max_age or max_age_days, not both".to_string(),
                ));
            }
            (Some(age), None) => self.max_age_days = parse_max_age(&age)?,
            (None, Some(days)) => self.max_age_days = (days > 0).then_some(days),
            (None, None) => {}
        }

        Ok(())
    }

    fn apply_env(&mut self, cache_dir: Option<OsString>) {
        if let Some(dir) = cache_dir.filter(|d| !d.is_empty()) {
            self.cache_root = PathBuf::from(dir);
        }
    }
}

/// Whole days in a humantime duration. Zero disables the limit.
fn parse_max_age(value: &str) -> Result<Option<u32>> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| StoreError::Config(format!("max_age '{value}': {e}")))?;
    let days = u32::try_from(duration.as_secs() / SECONDS_PER_DAY).unwrap_or(u32::MAX);
    Ok((days > 0).then_some(days))
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_cache_root() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("cache"))
        .unwrap_or_else(|| PathBuf::from(".district-store").join("cache"))
}
