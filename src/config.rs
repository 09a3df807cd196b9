//! Platform definitions and logging options.
//!
//! Settings are an explicit value handed to [`crate::platform::Platform::open`];
//! nothing is discovered behind the caller's back. A TOML file such as
//!
//! ```toml
//! default_platform = "local"
//!
//! [platforms.local]
//! backend = "sqlite"
//! path = "scenarios.db"
//!
//! [platforms.scratch]
//! backend = "memory"
//! cache = false
//! ```
//!
//! is layered under `IXSTORE__*` environment variables, where `__` separates
//! nesting levels (`IXSTORE__PLATFORMS__LOCAL__PATH=other.db`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{IxError, Result};

pub const ENV_PREFIX: &str = "IXSTORE";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub backend: BackendKind,
    /// Database file of the SQLite engine; absent means an in-memory database.
    pub path: Option<PathBuf>,
    /// Wraps the engine in a caching layer.
    pub cache: bool,
    pub busy_timeout_ms: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: None,
            cache: true,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// An `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub with_target: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: false,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_platform: String,
    pub platforms: BTreeMap<String, PlatformSettings>,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert("default".to_string(), PlatformSettings::default());
        Self {
            default_platform: "default".to_string(),
            platforms,
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Reads the optional file, then applies the environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
    /// Builds settings from TOML text alone, ignoring the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
    /// The named platform, or the default one when no name is given.
    pub fn platform(&self, name: Option<&str>) -> Result<&PlatformSettings> {
        let name = name.unwrap_or(&self.default_platform);
        self.platforms
            .get(name)
            .ok_or_else(|| IxError::Config(format!("no platform named '{}'", name)))
    }
}
