use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{IndexerConfig, Interpretation, MusicLocation, Naming, Separators, DEFAULT_LANES};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub name: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub version: u32,
    pub locations: Vec<LocationConfig>,
    pub cache_path: String,
    /// Empty disables cover art.
    pub covers_path: String,
    pub silo: String,
    pub lanes: usize,
    pub naming: Naming,
    pub separators: Separators,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            locations: Vec::new(),
            cache_path: "cache.redb".to_string(),
            covers_path: "covers".to_string(),
            silo: "default".to_string(),
            lanes: DEFAULT_LANES,
            naming: Naming::default(),
            separators: Separators::default(),
        }
    }
}

impl IndexConfig {
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            lanes: self.lanes,
            silo: self.silo.clone(),
            interpretation: Interpretation {
                naming: self.naming,
                separators: self.separators.clone(),
            },
        }
    }

    /// Configured locations with paths resolved against the config file. Blank paths are
    /// skipped and unnamed locations take their directory name.
    pub fn music_locations(&self, config_path: &Path) -> Vec<MusicLocation> {
        self.locations
            .iter()
            .filter(|location| !location.path.trim().is_empty())
            .map(|location| {
                let root = resolve_path(config_path, location.path.trim());
                let name = match location.name.trim() {
                    "" => root
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                        .unwrap_or_else(|| "Music".to_string()),
                    name => name.to_string(),
                };
                MusicLocation::new(name, root)
            })
            .collect()
    }

    pub fn covers_dir(&self, config_path: &Path) -> Option<PathBuf> {
        let trimmed = self.covers_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(resolve_path(config_path, trimmed))
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("INDEX_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(IndexConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: IndexConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.lanes == 0 {
            config.lanes = DEFAULT_LANES;
        }
        if config.silo.trim().is_empty() {
            config.silo = "default".to_string();
        }
        if config.cache_path.trim().is_empty() {
            config.cache_path = "cache.redb".to_string();
        }
        return Ok((config, false));
    }

    let config = IndexConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &IndexConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
