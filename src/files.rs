use std::path::{
    Path,
    PathBuf,
};

use color_eyre::eyre::{
    Context,
    Error,
    OptionExt,
};
use directories::ProjectDirs;

use crate::config::AppConfig;

#[derive(Clone, Debug)]
pub struct AppFiles {
    project_dirs: ProjectDirs,
}

impl AppFiles {
    pub fn open() -> Result<Self, Error> {
        let project_dirs = ProjectDirs::from("", "", std::env!("CARGO_PKG_NAME"))
            .ok_or_eyre("Could not determine home directory")?;
        std::fs::create_dir_all(project_dirs.config_local_dir())?;
        Ok(Self { project_dirs })
    }

    pub fn config_path(&self) -> PathBuf {
        self.project_dirs.config_local_dir().join("config.toml")
    }

    pub fn default_store_dir(&self) -> PathBuf {
        self.project_dirs.data_local_dir().join("datasets")
    }

    /// Read config file, or create one if it doesn't exist yet.
    pub fn read_config_or_create(&self) -> Result<AppConfig, Error> {
        let path = self.config_path();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Creating config file");
            let config = AppConfig::default();
            let toml = toml::to_string_pretty(&config)?;
            std::fs::write(&path, &toml)
                .with_context(|| format!("Could not write config file: {}", path.display()))?;
            Ok(config)
        }
        else {
            crate::config::read_config(&path)
        }
    }

    pub fn store_dir(&self, config: &AppConfig, overridden: Option<&Path>) -> PathBuf {
        overridden
            .or(config.store.as_deref())
            .map_or_else(|| self.default_store_dir(), Path::to_owned)
    }
}
