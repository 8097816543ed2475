//! Builder configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Configuration for the image store, base resolution, and installer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Root of the image store (staging, images, tags)
    pub store_root: PathBuf,
    /// Directory of cached base archives
    pub base_store: PathBuf,
    /// Optional HTTP mirror serving `<name>/<tag>.tar.gz`
    #[serde(default)]
    pub base_mirror: Option<String>,
    /// Test/alternative installer; replaces the pip invocation
    #[serde(default)]
    pub installer_override: Option<PathBuf>,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("./kiln-store"),
            base_store: PathBuf::from("./kiln-bases"),
            base_mirror: None,
            installer_override: None,
        }
    }
}

impl KilnConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
