use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::DEFAULT_TYPE_SAMPLE_VALUES;
use crate::metadata_cache::{MetadataCacheOptions, DEFAULT_METADATA_TTL, DEFAULT_SAMPLE_SIZE};
use crate::page_query::{DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_DEBOUNCE};
use crate::probe::{ProbeOptions, DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_BACKOFF, DEFAULT_PROBE_TIMEOUT};

pub const CONFIG_DIR_ENV: &str = "ROWSCOPE_CONFIG_DIR";
pub const PASSWORD_ENV: &str = "ROWSCOPE_DB_PASSWORD";

const DEFAULT_ROW_HEIGHT: f64 = 28.0;
const DEFAULT_OVERSCAN: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
        }
    }

    /// Passwords never live in the settings file.
    #[must_use]
    pub fn password(&self) -> Option<String> {
        env::var(PASSWORD_ENV).ok().filter(|password| !password.is_empty())
    }
}

fn default_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserSettings {
    pub metadata_ttl_secs: u64,
    pub sample_size: usize,
    pub type_sample_values: usize,
    pub page_size: usize,
    pub probe_timeout_ms: u64,
    pub probe_attempts: u32,
    pub probe_backoff_ms: u64,
    pub search_debounce_ms: u64,
    pub row_height: f64,
    pub overscan: usize,
    pub metadata_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            metadata_ttl_secs: DEFAULT_METADATA_TTL.as_secs(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            type_sample_values: DEFAULT_TYPE_SAMPLE_VALUES,
            page_size: DEFAULT_PAGE_SIZE,
            probe_timeout_ms: duration_millis(DEFAULT_PROBE_TIMEOUT),
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_backoff_ms: duration_millis(DEFAULT_PROBE_BACKOFF),
            search_debounce_ms: duration_millis(DEFAULT_SEARCH_DEBOUNCE),
            row_height: DEFAULT_ROW_HEIGHT,
            overscan: DEFAULT_OVERSCAN,
            metadata_dir: None,
        }
    }
}

impl BrowserSettings {
    #[must_use]
    pub fn cache_options(&self) -> MetadataCacheOptions {
        MetadataCacheOptions {
            ttl: Duration::from_secs(self.metadata_ttl_secs),
            sample_size: self.sample_size,
            type_sample_values: self.type_sample_values,
            fetch: self.probe_options(),
        }
    }

    #[must_use]
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(self.probe_timeout_ms),
            attempts: self.probe_attempts,
            backoff: Duration::from_millis(self.probe_backoff_ms),
        }
    }

    #[must_use]
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    browser: BrowserSettings,
    #[serde(default)]
    connections: Vec<ConnectionProfile>,
}

impl SettingsDocument {
    fn normalize(&mut self) {
        let mut by_name = std::collections::BTreeMap::new();
        for profile in self.connections.drain(..) {
            by_name.insert(profile.name.clone(), profile);
        }
        self.connections = by_name.into_values().collect();
    }
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    browser: BrowserSettings,
    connections: Vec<ConnectionProfile>,
}

impl FileSettingsStore {
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = default_settings_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let mut doc: SettingsDocument =
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        doc.normalize();

        Ok(Self {
            path,
            browser: doc.browser,
            connections: doc.connections,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            browser: BrowserSettings::default(),
            connections: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn browser(&self) -> &BrowserSettings {
        &self.browser
    }

    pub fn set_browser(&mut self, browser: BrowserSettings) {
        self.browser = browser;
    }

    #[must_use]
    pub fn connections(&self) -> &[ConnectionProfile] {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&ConnectionProfile> {
        self.connections.iter().find(|profile| profile.name == name)
    }

    pub fn upsert_connection(&mut self, profile: ConnectionProfile) {
        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|existing| existing.name == profile.name)
        {
            *existing = profile;
        } else {
            self.connections.push(profile);
            self.connections.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        }
    }

    /// Durable metadata lives next to the settings file unless overridden.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        if let Some(dir) = &self.browser.metadata_dir {
            return dir.clone();
        }
        self.path
            .parent()
            .map_or_else(|| PathBuf::from("metadata"), |dir| dir.join("metadata"))
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SettingsDocument {
            browser: self.browser.clone(),
            connections: self.connections.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let base_dir = if let Some(custom) = env::var_os(CONFIG_DIR_ENV) {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("rowscope").join("settings.toml"))
}
