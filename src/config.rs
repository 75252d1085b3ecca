//! Host configuration (hotmod.toml)
//!
//! Every field is optional; an empty file yields the defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::Result;

/// Host configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Directory scanned recursively for plugin modules.
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Directory of shared dependency modules.
    #[serde(default = "default_libraries_dir")]
    pub libraries_dir: PathBuf,

    /// File extension of module files.
    #[serde(default = "default_extension")]
    pub module_extension: String,

    /// Rewrite identities on load so the same logical module can be loaded
    /// repeatedly. Disabling loads bytes verbatim; reloading the same module
    /// then collides under host rules.
    #[serde(default = "default_true")]
    pub hotload: bool,

    /// Watch the plugins directory and reload on changes.
    #[serde(default = "default_true")]
    pub watch: bool,
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_libraries_dir() -> PathBuf {
    PathBuf::from("libraries")
}

fn default_extension() -> String {
    "wasm".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            libraries_dir: default_libraries_dir(),
            module_extension: default_extension(),
            hotload: true,
            watch: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
