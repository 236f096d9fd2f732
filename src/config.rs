use std::path::{
    Path,
    PathBuf,
};

use color_eyre::eyre::{
    Context,
    Error,
};
use maxwell_dataset::BuilderConfig;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Store directory. Defaults to a `datasets` directory in the user's
    /// data directory.
    #[serde(default)]
    pub store: Option<PathBuf>,

    #[serde(default = "default_batch")]
    pub batch: String,

    /// Worker threads. Defaults to one per core.
    #[serde(default)]
    pub threads: Option<usize>,

    #[serde(default)]
    pub dataset: BuilderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: None,
            batch: default_batch(),
            threads: None,
            dataset: Default::default(),
        }
    }
}

fn default_batch() -> String {
    "train".to_owned()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn to_string_pretty<T: Serialize>(&self, value: &T) -> Result<String, Error> {
        Ok(match self {
            Self::Toml => toml::to_string_pretty(value)?,
            Self::Json => serde_json::to_string_pretty(value)?,
        })
    }
}

/// Reads a config file, picking the format from the file extension.
pub fn read_config(path: &Path) -> Result<AppConfig, Error> {
    tracing::info!(path = %path.display(), "Reading config file");

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read config file: {}", path.display()))?;

    let config = match ConfigFormat::from_path(path) {
        ConfigFormat::Toml => toml::from_str(&text).map_err(Error::from),
        ConfigFormat::Json => serde_json::from_str(&text).map_err(Error::from),
    };
    config.with_context(|| format!("Invalid config file: {}", path.display()))
}
