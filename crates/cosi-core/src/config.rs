use crate::CoreError;
use cosi_archive::CompressionSettings;
use cosi_schema::OsArch;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Generator settings, loaded from an optional TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GeneratorConfig {
    /// Overrides the architecture inferred from the root partition type.
    pub os_arch: Option<String>,
    pub shrink: bool,
    /// Where staging files go. Defaults to the system temporary directory.
    pub scratch_dir: Option<PathBuf>,
    pub compression: CompressionSettings,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            os_arch: None,
            shrink: true,
            scratch_dir: None,
            compression: CompressionSettings::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            debug!("no generator config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            CoreError::Config(msg) => CoreError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn os_arch_override(&self) -> Option<OsArch> {
        self.os_arch.as_deref().map(OsArch::from)
    }
}
