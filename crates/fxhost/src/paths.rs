use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "FxRuntime";
const APPLICATION: &str = "fxhost";
const CONFIG_FILE: &str = "fxhost.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

/// Screenshot file name for a key-triggered capture, `<application> <date>.<ext>`.
pub fn screenshot_file_name(application: &str, at: chrono::NaiveDateTime, extension: &str) -> String {
    format!("{application} {}.{extension}", at.format("%Y-%m-%d %H-%M-%S"))
}
