use crate::errors::ConfigError;
use crate::model::QcSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// `qualify.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualifyConfig {
    pub version: u32,

    /// Directory scanned for protocol definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols_dir: Option<PathBuf>,

    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// QC defaults for protocols without their own `qc` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc: Option<QcSettings>,
}

fn default_database() -> PathBuf {
    PathBuf::from("qualify.db")
}

impl Default for QualifyConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            protocols_dir: None,
            database: default_database(),
            qc: None,
        }
    }
}

impl QualifyConfig {
    pub fn qc_defaults(&self) -> QcSettings {
        self.qc.clone().unwrap_or_default()
    }

    /// Resolve relative paths against the directory the config was read from.
    fn rebase(mut self, base: &Path) -> Self {
        if self.database.is_relative() {
            self.database = base.join(&self.database);
        }
        if let Some(dir) = self.protocols_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }
}

pub fn parse_config(raw: &str) -> Result<QualifyConfig, ConfigError> {
    let cfg: QualifyConfig =
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found: cfg.version,
            supported: SUPPORTED_CONFIG_VERSION,
        });
    }
    if let Some(qc) = &cfg.qc {
        crate::protocol::validate::validate_qc("qc", qc)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<QualifyConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = parse_config(&raw)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(cfg.rebase(base))
}
