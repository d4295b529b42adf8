//! Daemon configuration: the JSON shape of §6, loaded with the `config`
//! crate the way `bin/server/src/config.rs` loads `ServerConfig`, but
//! layered over four file candidates instead of environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

/// Storage backend selection. `type: "local"` is the single-writer SQLite
/// backend; `type: "remote"` is the pooled PostgreSQL backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            default_timezone: default_timezone(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

fn default_check_interval() -> String {
    "30s".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    Http,
}

fn default_transport() -> Transport {
    Transport::Stdio
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub auth: HttpAuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_port() -> u16 {
    8787
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpAuthConfig {
    #[serde(rename = "type", default)]
    pub kind: HttpAuthKind,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpAuthKind {
    #[default]
    None,
    Bearer,
    Apikey,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub origins: Vec<String>,
}

impl DaemonConfig {
    /// Loads configuration from, in precedence order: `explicit_path` (if
    /// given), `./.claude/claudecron.json`, `$HOME/.claude/claudecron/config.json`,
    /// `./claudecron.json`, and finally the built-in defaults below every
    /// file source.
    ///
    /// # Errors
    ///
    /// Returns an error if a candidate file exists but fails to parse, or
    /// if the merged configuration is missing `storage.type`.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(
            config::File::from_str(DEFAULTS_JSON, config::FileFormat::Json),
        );

        for candidate in candidate_paths(explicit_path) {
            builder = builder.add_source(
                config::File::from(candidate).format(config::FileFormat::Json).required(false),
            );
        }

        builder.build()?.try_deserialize()
    }
}

const DEFAULTS_JSON: &str = r#"{
    "scheduler": { "check_interval": "30s", "default_timezone": "UTC", "max_concurrent_tasks": 10 },
    "transport": "stdio"
}"#;

/// Lowest precedence first, matching `config`'s "later source wins" merge
/// order (§6: "explicit argument, `./.claude/claudecron.json`,
/// `$HOME/.claude/claudecron/config.json`, `./claudecron.json`" highest
/// first).
fn candidate_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./claudecron.json")];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".claude/claudecron/config.json"));
    }
    paths.push(PathBuf::from("./.claude/claudecron.json"));
    if let Some(explicit) = explicit_path {
        paths.push(explicit.to_path_buf());
    }
    paths
}
