use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tdm_fusion::SourcePriority;
use tdm_generate::GenerateOptions;
use tdm_mask::MaskingConfig;
use tdm_subset::SubsetOptions;

use crate::CliError;

pub const DEFAULT_CONFIG_PATH: &str = "tdm.toml";

/// Settings read from `tdm.toml`; flags given on the command line win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TdmConfig {
    pub subset: SubsetOptions,
    pub generate: GenerateOptions,
    pub mask: MaskingConfig,
    pub fusion: SourcePriority,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    /// Append logs here instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl TdmConfig {
    /// Load `path`; a missing default file yields defaults, a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}
