//! CLI configuration.
//!
//! Read from `~/.config/dcdn/config.json` (or `%APPDATA%\dcdn\config.json`)
//! when present. Missing sections and fields fall back to defaults.

use std::path::{Path, PathBuf};

use dcdn_transfer::{ReadConfig, SessionConfig};
use dcdn_upload::UploadConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Principal used for the local identity; defaults to the host name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub principal: String,
    pub session: SessionConfig,
    pub read: ReadConfig,
    pub upload: UploadConfig,
}

fn default_principal() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "local".into())
}

impl AppConfig {
    /// Loads from `path`, or from the default location when `None`.
    ///
    /// A file that fails to parse is reported and ignored.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse config, using defaults"
                    );
                    AppConfig::default()
                }
            }
        } else {
            AppConfig::default()
        };

        if config.principal.is_empty() {
            config.principal = default_principal();
        }
        Ok(config)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("dcdn").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return Ok(PathBuf::from(xdg));
        }
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
