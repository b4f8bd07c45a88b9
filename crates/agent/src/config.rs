use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// camtunnel device agent.
///
/// Connects out to a hub's WebSocket tunnel endpoint, registers its
/// cameras, and services `LIST_VIDEOS`/`READ_FILE` requests against local
/// recordings. Maintains a reconnect loop with exponential backoff when the
/// tunnel drops.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Hub base URL (e.g. https://hub.example.com)
    #[arg(long, env = "CAMTUNNEL_AGENT_HUB_URL")]
    pub hub_url: String,

    /// This device's id, sent in the REGISTER frame
    #[arg(long, env = "CAMTUNNEL_AGENT_DEVICE_ID")]
    pub device_id: String,

    /// Shared bearer token presented during the tunnel handshake
    #[arg(long, env = "CAMTUNNEL_AGENT_DEVICE_TOKEN")]
    pub device_token: String,

    /// Camera ids this device serves, comma-separated
    #[arg(long, env = "CAMTUNNEL_AGENT_CAMERA_IDS", value_delimiter = ',')]
    pub camera_ids: Vec<String>,

    /// Root directory holding `<camera_id>/merged/*.mp4` recordings
    #[arg(long, env = "CAMTUNNEL_AGENT_RECORDINGS_ROOT")]
    pub recordings_root: String,

    /// Binary chunk size for READ_FILE responses
    #[arg(long, env = "CAMTUNNEL_AGENT_CHUNK_SIZE_BYTES", default_value_t = 65536)]
    pub chunk_size_bytes: usize,

    /// Seconds of silence on the tunnel before the agent reconnects
    #[arg(long, env = "CAMTUNNEL_AGENT_HEARTBEAT_TIMEOUT_SECS", default_value_t = 30)]
    pub heartbeat_timeout_secs: u64,

    /// TCP + WebSocket handshake connect timeout in seconds
    #[arg(long, env = "CAMTUNNEL_AGENT_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Reconnect backoff base delay in milliseconds
    #[arg(long, env = "CAMTUNNEL_AGENT_RECONNECT_BASE_DELAY_MS", default_value_t = 500)]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect backoff max delay in milliseconds
    #[arg(long, env = "CAMTUNNEL_AGENT_RECONNECT_MAX_DELAY_MS", default_value_t = 30_000)]
    pub reconnect_max_delay_ms: u64,

    /// TCP keepalive in seconds (0 disables)
    #[arg(long, env = "CAMTUNNEL_AGENT_TCP_KEEPALIVE_SECS", default_value_t = 60)]
    pub tcp_keepalive_secs: u64,

    /// TCP_NODELAY on the tunnel socket
    #[arg(long, env = "CAMTUNNEL_AGENT_TCP_NODELAY", default_value_t = true)]
    pub tcp_nodelay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CAMTUNNEL_AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "CAMTUNNEL_AGENT_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Optional TOML config file overlay, applied under CLI and env vars
    #[arg(long, env = "CAMTUNNEL_AGENT_CONFIG_FILE")]
    pub config_file: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("CAMTUNNEL_AGENT_CONFIG_FILE") {
            if let Ok(file) = ConfigFile::load(Path::new(&path)) {
                file.inject_env();
            }
        }
        Ok(Config::parse())
    }
}

/// Serializable subset of [`Config`] for TOML file persistence.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recordings_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_keepalive_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_nodelay: Option<bool>,
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
        set!("CAMTUNNEL_AGENT_HUB_URL", self.hub_url);
        set!("CAMTUNNEL_AGENT_DEVICE_ID", self.device_id);
        set!("CAMTUNNEL_AGENT_DEVICE_TOKEN", self.device_token);
        if let Some(ref ids) = self.camera_ids {
            if std::env::var("CAMTUNNEL_AGENT_CAMERA_IDS").is_err() {
                std::env::set_var("CAMTUNNEL_AGENT_CAMERA_IDS", ids.join(","));
            }
        }
        set!("CAMTUNNEL_AGENT_RECORDINGS_ROOT", self.recordings_root);
        set!("CAMTUNNEL_AGENT_CHUNK_SIZE_BYTES", self.chunk_size_bytes);
        set!("CAMTUNNEL_AGENT_HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout_secs);
        set!("CAMTUNNEL_AGENT_CONNECT_TIMEOUT_SECS", self.connect_timeout_secs);
        set!("CAMTUNNEL_AGENT_RECONNECT_BASE_DELAY_MS", self.reconnect_base_delay_ms);
        set!("CAMTUNNEL_AGENT_RECONNECT_MAX_DELAY_MS", self.reconnect_max_delay_ms);
        set!("CAMTUNNEL_AGENT_TCP_KEEPALIVE_SECS", self.tcp_keepalive_secs);
        set!("CAMTUNNEL_AGENT_TCP_NODELAY", self.tcp_nodelay);
        set!("CAMTUNNEL_AGENT_LOG_LEVEL", self.log_level);
        set!("CAMTUNNEL_AGENT_LOG_JSON", self.log_json);
    }
}
