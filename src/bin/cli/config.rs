use super::ThemeArg;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sombra_check::check::CheckOptions;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings read from the CLI config file. Command-line flags win.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    theme: Option<ThemeArg>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let theme = match data.theme.as_deref() {
            Some(value) => Some(ThemeArg::from_str(value, true).map_err(|_| {
                ConfigError::InvalidTheme {
                    value: value.to_string(),
                }
            })?),
            None => None,
        };
        Ok(Self { path, data, theme })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check options from the `[check]` table, defaults elsewhere.
    pub fn check_options(&self) -> CheckOptions {
        self.data.check.clone()
    }

    pub fn cache_pages(&self) -> Option<usize> {
        self.data.cache_pages
    }

    pub fn theme(&self) -> Option<ThemeArg> {
        self.theme
    }

    /// Writes the current settings, creating the config directory.
    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = match &self.path {
            Some(path) => path.clone(),
            None => default_config_path().ok_or(ConfigError::NoConfigPath)?,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    cache_pages: Option<usize>,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    check: CheckOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize CLI config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write CLI config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("theme value '{value}' is invalid")]
    InvalidTheme { value: String },
    #[error("no config directory found; pass --config or set SOMBRA_CHECK_CONFIG")]
    NoConfigPath,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sombra-check").join("config.toml"))
}
