use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smartmark")]
#[command(about = "Personal bookmarks with live sync", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the web service (default)
    Serve,
    /// Follow one user's bookmarks from the terminal
    Watch {
        /// Access token issued by the identity provider
        #[arg(short = 't', long = "token")]
        token: Option<String>,
    },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".smartmark")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_port")]
    port: u16,
    /// Where the identity provider sends the browser after login.
    #[serde(default)]
    site_url: Option<String>,
    #[serde(default)]
    pub optimistic_insert: bool,
    #[serde(default = "default_oauth_provider")]
    pub oauth_provider: String,
    /// How long a user's workspace stays subscribed after its last open view.
    #[serde(default = "default_workspace_idle")]
    pub workspace_idle_seconds: u64,
}

impl Default for App {
    fn default() -> Self {
        App {
            port: default_port(),
            site_url: None,
            optimistic_insert: false,
            oauth_provider: default_oauth_provider(),
            workspace_idle_seconds: default_workspace_idle(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_oauth_provider() -> String {
    "google".to_string()
}

fn default_workspace_idle() -> u64 {
    30
}

impl App {
    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_workspace_idle(&self) -> Duration {
        Duration::from_secs(self.workspace_idle_seconds)
    }

    /// Falls back to the local address when unset or left empty by env substitution.
    pub fn get_site_url(&self) -> &str {
        match self.site_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => DEFAULT_SITE_URL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Backend {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_table() -> String {
    "bookmarks".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

impl Backend {
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Realtime {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

impl Default for Realtime {
    fn default() -> Self {
        Realtime {
            heartbeat_seconds: default_heartbeat(),
            reconnect: true,
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }
}

fn default_heartbeat() -> u64 {
    25
}

fn default_true() -> bool {
    true
}

fn default_reconnect_initial() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    pub backend: Backend,
    #[serde(default)]
    pub realtime: Realtime,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        config.validate()?;
        Ok(config)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        let yaml_with_env = Config::substitute_env_vars(&yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.url.trim().is_empty() {
            bail!("backend.url must be set");
        }
        if self.backend.anon_key.trim().is_empty() {
            bail!("backend.anon_key must be set");
        }
        if self.realtime.reconnect_initial_ms == 0 || self.realtime.reconnect_max_ms < self.realtime.reconnect_initial_ms
        {
            bail!("realtime.reconnect_max_ms must be >= reconnect_initial_ms > 0");
        }
        Ok(())
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
