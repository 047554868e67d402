//! Engine configuration and persisted user settings
//!
//! Settings live in ~/.config/retrocache/settings.json.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::download::DEFAULT_REFRESH_DELAY;
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::saves::DEFAULT_MAX_CLOUD_SAVES;
use crate::sources::{CapabilitySource, TargetInfo};
use crate::status::SaveCheck;

/// Page size override, read once per process
pub fn page_size_override() -> Option<usize> {
    static PAGE_SIZE: OnceLock<Option<usize>> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        std::env::var("RETROCACHE_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
    })
}

/// Knobs fixed for the lifetime of an engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items per listing page
    pub page_size: usize,

    /// Whole catalog is mirrored in memory; enables client-side paging
    pub library_mirrored: bool,

    /// Save presence strategy when the library is not mirrored.
    /// Mirrored libraries always use a full check.
    pub unmirrored_save_check: SaveCheck,

    /// Delay before the secondary refresh after a completed download
    pub refresh_delay_ms: u64,

    /// Cloud saves offered when resolving a resume conflict
    pub max_cloud_saves: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: page_size_override().unwrap_or(DEFAULT_PAGE_SIZE),
            library_mirrored: true,
            unmirrored_save_check: SaveCheck::Skip,
            refresh_delay_ms: DEFAULT_REFRESH_DELAY.as_millis() as u64,
            max_cloud_saves: DEFAULT_MAX_CLOUD_SAVES,
        }
    }
}

impl EngineConfig {
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    /// Save check in effect for this configuration
    pub fn save_check(&self) -> SaveCheck {
        if self.library_mirrored {
            SaveCheck::Full
        } else {
            self.unmirrored_save_check
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidPageSize);
        }
        if self.max_cloud_saves == 0 {
            return Err(ConfigError::InvalidCloudSaveLimit);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Page size must be at least 1")]
    InvalidPageSize,

    #[error("At least one cloud save must be offered")]
    InvalidCloudSaveLimit,

    #[error("Server URL is not configured")]
    MissingServerUrl,
}

/// User settings for the CLI and bundled collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the library server
    #[serde(default)]
    pub server_url: String,

    /// Where downloaded items are placed
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,

    /// Install index database
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Local save files, one subdirectory per item id
    #[serde(default)]
    pub saves_dir: Option<PathBuf>,

    /// Extract downloaded .zip archives
    #[serde(default)]
    pub extract_archives: bool,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Emulators keyed by a short identifier
    #[serde(default)]
    pub emulators: BTreeMap<String, EmulatorSettings>,
}

/// One emulator entry in the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorSettings {
    pub name: String,
    /// Platform slugs this emulator runs
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Executable; entries without one are known but not launchable
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Capability source backed by the emulator section of the settings
pub struct ConfiguredEmulators {
    emulators: BTreeMap<String, EmulatorSettings>,
}

impl ConfiguredEmulators {
    pub fn new(emulators: BTreeMap<String, EmulatorSettings>) -> Self {
        Self { emulators }
    }
}

#[async_trait]
impl CapabilitySource for ConfiguredEmulators {
    async fn supported_targets(&self) -> Result<HashMap<String, TargetInfo>> {
        Ok(self
            .emulators
            .iter()
            .map(|(key, emu)| {
                (
                    key.clone(),
                    TargetInfo {
                        name: emu.name.clone(),
                        supported_platforms: emu.platforms.clone(),
                    },
                )
            })
            .collect())
    }

    async fn configured_paths(&self) -> Result<HashMap<String, PathBuf>> {
        Ok(self
            .emulators
            .iter()
            .filter_map(|(key, emu)| emu.path.clone().map(|path| (key.clone(), path)))
            .collect())
    }
}

impl Settings {
    /// Get the config directory path (~/.config/retrocache)
    fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("retrocache"))
    }

    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn try_load() -> Result<Self> {
        let path = Self::settings_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {:?}", config_dir))?;

        let path = Self::settings_path()?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    pub fn require_server(&self) -> Result<&str, ConfigError> {
        let url = self.server_url.trim();
        if url.is_empty() {
            Err(ConfigError::MissingServerUrl)
        } else {
            Ok(url)
        }
    }

    /// Downloads directory, defaulting to ~/.local/share/retrocache/roms
    pub fn downloads_dir(&self) -> Result<PathBuf> {
        match &self.downloads_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("roms")),
        }
    }

    /// Index database path, defaulting to ~/.local/share/retrocache/index.db
    pub fn index_path(&self) -> Result<PathBuf> {
        match &self.index_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("index.db")),
        }
    }

    /// Saves directory, defaulting to ~/.local/share/retrocache/saves
    pub fn saves_dir(&self) -> Result<PathBuf> {
        match &self.saves_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("saves")),
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("Could not determine data directory")?
        .join("retrocache"))
}
