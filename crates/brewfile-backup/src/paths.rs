use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const APP_DIR_NAME: &str = "brewfile-backup";
pub const HOME_ENV: &str = "BREWFILE_BACKUP_HOME";

const STATE_FILE_NAME: &str = "state.json";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const LOG_FILE_NAME: &str = "backup.log";
const DOTENV_FILE_NAME: &str = ".env";

/// Per-user locations. Everything lives under a single config directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
}

impl AppPaths {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    // Lookup order:
    // - $BREWFILE_BACKUP_HOME
    // - $XDG_CONFIG_HOME/brewfile-backup
    // - $HOME/.config/brewfile-backup
    pub fn discover() -> Result<Self> {
        if let Some(dir) = non_empty_env(HOME_ENV) {
            return Ok(Self::new(expand_home(&dir)?));
        }
        if let Some(xdg) = non_empty_env("XDG_CONFIG_HOME") {
            return Ok(Self::new(PathBuf::from(xdg).join(APP_DIR_NAME)));
        }
        let home = home_dir()?;
        Ok(Self::new(home.join(".config").join(APP_DIR_NAME)))
    }

    pub fn state_file(&self) -> PathBuf {
        self.config_dir.join(STATE_FILE_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.config_dir.join(LOG_FILE_NAME)
    }

    pub fn dotenv_file(&self) -> PathBuf {
        self.config_dir.join(DOTENV_FILE_NAME)
    }

    /// Resolve a user-supplied path: `~/` expands to the home directory, relative paths are
    /// rooted at the config directory.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let expanded = expand_home(raw)?;
        Ok(if expanded.is_absolute() {
            expanded
        } else {
            self.config_dir.join(expanded)
        })
    }
}

pub fn expand_home(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::state("empty path"));
    }
    if raw == "~" {
        return home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn home_dir() -> Result<PathBuf> {
    non_empty_env("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::state("HOME is not set; cannot locate the configuration directory"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
