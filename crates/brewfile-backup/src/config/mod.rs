use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}

fn default_description() -> String {
    "Homebrew Brewfile Backup".into()
}

fn default_filename() -> String {
    "Brewfile".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_helper() -> String {
    "gh".into()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

fn default_auth_timeout_secs() -> u64 {
    5
}

fn default_brew_program() -> String {
    "brew".into()
}

fn default_version_timeout_secs() -> u64 {
    10
}

fn default_dump_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            description: default_description(),
            filename: default_filename(),
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl RemoteSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Helper CLI asked first (`<helper> auth status`, then `<helper> auth token`).
    #[serde(default = "default_helper")]
    pub helper: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            helper: default_helper(),
            token_env: default_token_env(),
            timeout_secs: default_auth_timeout_secs(),
        }
    }
}

impl AuthSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    #[serde(default = "default_brew_program")]
    pub program: String,
    #[serde(default = "default_version_timeout_secs")]
    pub version_timeout_secs: u64,
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            program: default_brew_program(),
            version_timeout_secs: default_version_timeout_secs(),
            dump_timeout_secs: default_dump_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: true,
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StateSettings {
    /// Overrides `<config dir>/state.json`. Relative paths are rooted at the config dir.
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub auth: AuthSettings,
    pub generator: GeneratorSettings,
    pub log: LogSettings,
    pub state: StateSettings,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.remote.api_base.trim().is_empty() {
            return Err(Error::state("remote.api_base must not be empty"));
        }
        if self.remote.filename.trim().is_empty() {
            return Err(Error::state("remote.filename must not be empty"));
        }
        if self.generator.program.trim().is_empty() {
            return Err(Error::state("generator.program must not be empty"));
        }
        Ok(())
    }
}

/// Load settings from `path`. A missing file means defaults unless `required` is set
/// (an explicit `--config` must exist).
pub fn load(path: &Path, required: bool) -> Result<Settings> {
    if !path.is_file() {
        if required {
            return Err(Error::state(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::state(format!("failed to read settings {}: {e}", path.display())))?;
    Settings::from_toml_str(&raw).map_err(|e| {
        Error::state(format!("invalid settings file {}: {e}", path.display()))
    })
}

/// Load `.env` from the config directory, if present. Variables already set in the process
/// environment win.
pub fn load_dotenv(path: &Path) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    dotenv::from_path(path)
        .map(|_| true)
        .map_err(|e| Error::state(format!("failed to load {}: {e}", path.display())))
}
