//! Runtime configuration for appfoundry.
//!
//! Read from `.appfoundry/appfoundry.toml` when present, then layered:
//! file → environment → CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [database]
//! path = ".appfoundry/appfoundry.db"
//!
//! [generation]
//! model = "gemini-2.5-flash"
//! idea_count = 10
//!
//! [scheduler]
//! failure_backoff_minutes = 5
//! lease_seconds = 900
//!
//! [preview]
//! runtime = "sandpack"
//! timeout_ms = 7000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::factory::orchestrator::MAX_LEASE_SECONDS;
use crate::factory::scheduler::MAX_FAILURE_BACKOFF_MINUTES;
use crate::preview::{PreviewOptions, RuntimeOptions};

pub const CONFIG_DIR: &str = ".appfoundry";
pub const CONFIG_FILE: &str = "appfoundry.toml";

pub const ENV_DB_PATH: &str = "APPFOUNDRY_DB_PATH";
pub const ENV_PORT: &str = "APPFOUNDRY_PORT";
pub const ENV_API_KEY: &str = "GOOGLE_GENERATIVE_AI_API_KEY";
pub const ENV_MODEL: &str = "APPFOUNDRY_MODEL";
pub const ENV_CRON_SECRET: &str = "CRON_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("appfoundry.db")
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Text-generation client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Fallback key when the stored configuration has none
    #[serde(default)]
    pub api_key: Option<String>,
    /// Ideas requested per cycle
    #[serde(default = "default_idea_count")]
    pub idea_count: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_idea_count() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            idea_count: default_idea_count(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_failure_backoff_minutes")]
    pub failure_backoff_minutes: i64,
    /// How long a pass may hold a job before others can take it over
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
    /// Bearer token required by the scheduled trigger
    #[serde(default)]
    pub cron_secret: Option<String>,
}

fn default_failure_backoff_minutes() -> i64 {
    crate::factory::scheduler::DEFAULT_FAILURE_BACKOFF_MINUTES
}

fn default_lease_seconds() -> i64 {
    900
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            failure_backoff_minutes: default_failure_backoff_minutes(),
            lease_seconds: default_lease_seconds(),
            cron_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Sandpack,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(default)]
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub client_script_url: Option<String>,
    #[serde(default)]
    pub bundler_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub stylesheet_url: Option<String>,
}

fn default_timeout_ms() -> u64 {
    7000
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            client_script_url: None,
            bundler_url: None,
            timeout_ms: default_timeout_ms(),
            stylesheet_url: None,
        }
    }
}

impl PreviewSettings {
    pub fn to_options(&self) -> PreviewOptions {
        let runtime = match self.runtime {
            RuntimeKind::None => None,
            RuntimeKind::Sandpack => {
                let defaults = RuntimeOptions::default();
                Some(RuntimeOptions {
                    client_script_url: self
                        .client_script_url
                        .clone()
                        .unwrap_or(defaults.client_script_url),
                    bundler_url: self.bundler_url.clone().unwrap_or(defaults.bundler_url),
                    timeout_ms: self.timeout_ms,
                })
            }
        };
        PreviewOptions {
            runtime,
            stylesheet_url: self.stylesheet_url.clone(),
        }
    }
}

/// Full configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub preview: PreviewSettings,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse appfoundry.toml")
    }

    /// Load `<dir>/appfoundry.toml`, or defaults if the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the file layer: an explicit path must exist, otherwise the
    /// default location is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::load_or_default(Path::new(CONFIG_DIR)),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = get(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_PORT, port))?;
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.generation.api_key = Some(key);
        }
        if let Some(model) = get(ENV_MODEL) {
            self.generation.model = model;
        }
        if let Some(secret) = get(ENV_CRON_SECRET) {
            self.scheduler.cron_secret = Some(secret);
        }
        Ok(())
    }

    /// Problems that would make the server misbehave.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.generation.idea_count == 0 {
            errors.push("generation.idea_count must be at least 1".to_string());
        }
        if !(1..=MAX_LEASE_SECONDS).contains(&self.scheduler.lease_seconds) {
            errors.push(format!(
                "scheduler.lease_seconds must be between 1 and {}",
                MAX_LEASE_SECONDS
            ));
        }
        if !(1..=MAX_FAILURE_BACKOFF_MINUTES).contains(&self.scheduler.failure_backoff_minutes) {
            errors.push(format!(
                "scheduler.failure_backoff_minutes must be between 1 and {}",
                MAX_FAILURE_BACKOFF_MINUTES
            ));
        }
        errors
    }
}
