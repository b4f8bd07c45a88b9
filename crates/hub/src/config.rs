use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// camtunnel hub.
///
/// Accepts device-agent WebSocket connections, keeps at most one live
/// session per device, and exposes the recordings those devices hold
/// over a plain HTTP surface.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Address to bind the HTTP + WebSocket listener on
    #[arg(long, env = "CAMTUNNEL_HUB_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Shared bearer token devices must present during the tunnel handshake
    #[arg(long, env = "CAMTUNNEL_HUB_DEVICE_TOKEN")]
    pub device_token: String,

    /// Allowed CORS origins for the HTTP surface (empty disables CORS)
    #[arg(long, env = "CAMTUNNEL_HUB_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Seconds of silence on a session before it is declared dead
    #[arg(long, env = "CAMTUNNEL_HUB_HEARTBEAT_TIMEOUT_SECS", default_value_t = 30)]
    pub heartbeat_timeout_secs: u64,

    /// Seconds to wait for an agent reply before failing a request upstream
    #[arg(long, env = "CAMTUNNEL_HUB_REQUEST_DEADLINE_SECS", default_value_t = 30)]
    pub request_deadline_secs: u64,

    /// Seconds to wait for the initial auth token + REGISTER frame
    #[arg(long, env = "CAMTUNNEL_HUB_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Hard ceiling on `page_size` for LIST_VIDEOS regardless of client request
    #[arg(long, env = "CAMTUNNEL_HUB_MAX_PAGE_SIZE", default_value_t = 500)]
    pub max_page_size: u32,

    /// Default `page_size` for LIST_VIDEOS when the caller omits it
    #[arg(long, env = "CAMTUNNEL_HUB_DEFAULT_PAGE_SIZE", default_value_t = 60)]
    pub default_page_size: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CAMTUNNEL_HUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "CAMTUNNEL_HUB_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Optional TOML config file overlay, applied under CLI and env vars
    #[arg(long, env = "CAMTUNNEL_HUB_CONFIG_FILE")]
    pub config_file: Option<String>,
}

impl Config {
    /// Parse CLI args, first injecting any values found in `--config-file`
    /// (or `CAMTUNNEL_HUB_CONFIG_FILE`) as environment variables so they sit
    /// below explicit env vars and CLI flags in precedence.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("CAMTUNNEL_HUB_CONFIG_FILE") {
            if let Ok(file) = ConfigFile::load(Path::new(&path)) {
                file.inject_env();
            }
        }
        Ok(Config::parse())
    }
}

/// Serializable subset of [`Config`] for TOML file persistence. All fields
/// are optional so a partial file only overrides what it names.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_deadline_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_json: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set environment variables for every populated field, without
    /// clobbering values the environment already has.
    pub fn inject_env(&self) {
        macro_rules! set {
            ($env:expr, $val:expr) => {
                if let Some(ref v) = $val {
                    if std::env::var($env).is_err() {
                        std::env::set_var($env, v.to_string());
                    }
                }
            };
        }
        set!("CAMTUNNEL_HUB_LISTEN_ADDR", self.listen_addr);
        set!("CAMTUNNEL_HUB_DEVICE_TOKEN", self.device_token);
        if let Some(ref origins) = self.cors_origins {
            if std::env::var("CAMTUNNEL_HUB_CORS_ORIGINS").is_err() {
                std::env::set_var("CAMTUNNEL_HUB_CORS_ORIGINS", origins.join(","));
            }
        }
        set!("CAMTUNNEL_HUB_HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout_secs);
        set!("CAMTUNNEL_HUB_REQUEST_DEADLINE_SECS", self.request_deadline_secs);
        set!("CAMTUNNEL_HUB_HANDSHAKE_TIMEOUT_SECS", self.handshake_timeout_secs);
        set!("CAMTUNNEL_HUB_MAX_PAGE_SIZE", self.max_page_size);
        set!("CAMTUNNEL_HUB_DEFAULT_PAGE_SIZE", self.default_page_size);
        set!("CAMTUNNEL_HUB_LOG_LEVEL", self.log_level);
        set!("CAMTUNNEL_HUB_LOG_JSON", self.log_json);
    }
}
