//! JSON payload shapes for the tunnel control vocabulary (SPEC_FULL §6).

use serde::{Deserialize, Serialize};

/// Text-frame `type` tags.
pub mod tag {
    pub const AUTH_OK: &str = "AUTH_OK";
    pub const AUTH_FAIL: &str = "AUTH_FAIL";
    pub const REGISTER: &str = "REGISTER";
    pub const LIST_VIDEOS: &str = "LIST_VIDEOS";
    pub const LIST_VIDEOS_RES: &str = "LIST_VIDEOS_RES";
    pub const READ_FILE: &str = "READ_FILE";
    pub const READ_FILE_META: &str = "READ_FILE_META";
    pub const ERROR: &str = "ERROR";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthFailPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub device_id: String,
    pub camera_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVideosRequest {
    pub camera_id: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub hour: Option<u8>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub filename: String,
    pub size: u64,
    pub timestamp: String,
    pub camera: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVideosResponse {
    pub videos: Vec<VideoEntry>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileRequest {
    pub camera_id: String,
    pub filename: String,
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileMeta {
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
