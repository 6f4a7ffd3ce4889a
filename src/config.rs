use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::library::LibrarySettings;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FolioConfig {
    pub server: ServerConfig,
    pub library: LibrarySection,
    /// Optional parent library this one delegates to on local misses.
    pub parent: Option<LibrarySection>,
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LibrarySection {
    pub name: String,
    pub application_name: String,
    pub home_path: String,
    pub writable_path: String,
    /// Commit journal directory; empty means `<home>/.journal`.
    pub repository_path: String,
    pub collections_path: String,
    pub changes_path: String,
    pub accounts_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub collection_limit: usize,
    pub change_window_days: i64,
    pub read_limit: usize,
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            library: LibrarySection::default(),
            parent: None,
            query: QueryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for LibrarySection {
    fn default() -> Self {
        let home_path = default_folio_dir()
            .join("library")
            .to_string_lossy()
            .into_owned();
        let writable_path = default_folio_dir()
            .join("writable")
            .to_string_lossy()
            .into_owned();
        Self {
            name: "Personal Library".into(),
            application_name: "library".into(),
            home_path,
            writable_path,
            repository_path: String::new(),
            collections_path: "/collections".into(),
            changes_path: "/changes".into(),
            accounts_path: "/people".into(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            collection_limit: 10,
            change_window_days: 30,
            read_limit: 10,
        }
    }
}

/// Returns `~/.folio/`
pub fn default_folio_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".folio")
}

/// Returns the default config file path: `~/.folio/config.toml`
pub fn default_config_path() -> PathBuf {
    default_folio_dir().join("config.toml")
}

impl FolioConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            FolioConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (FOLIO_HOME, FOLIO_WRITABLE,
    /// FOLIO_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FOLIO_HOME") {
            self.library.home_path = val;
        }
        if let Ok(val) = std::env::var("FOLIO_WRITABLE") {
            self.library.writable_path = val;
        }
        if let Ok(val) = std::env::var("FOLIO_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Engine settings for the main library.
    pub fn library_settings(&self) -> LibrarySettings {
        self.library.to_settings(&self.query)
    }

    /// Engine settings for the configured parent library, if any.
    pub fn parent_settings(&self) -> Option<LibrarySettings> {
        self.parent.as_ref().map(|p| p.to_settings(&self.query))
    }
}

impl LibrarySection {
    fn to_settings(&self, query: &QueryConfig) -> LibrarySettings {
        let home_path = expand_tilde(&self.home_path);
        let repository_path = if self.repository_path.is_empty() {
            home_path.join(".journal")
        } else {
            expand_tilde(&self.repository_path)
        };
        LibrarySettings {
            application_name: self.application_name.clone(),
            name: self.name.clone(),
            home_path,
            writable_path: expand_tilde(&self.writable_path),
            repository_path,
            collections_path: self.collections_path.clone(),
            changes_path: self.changes_path.clone(),
            accounts_path: self.accounts_path.clone(),
            collection_limit: query.collection_limit,
            change_window_days: query.change_window_days,
            read_limit: query.read_limit,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
