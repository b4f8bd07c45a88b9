//! Agent-side tunnel session: one per hub connection attempt.
//!
//! Simpler than the hub's `TunnelSession` — the agent never issues
//! correlated requests of its own, so there is no [`PendingTable`] here,
//! just a writer handle and a shutdown signal shared by the dispatcher and
//! its per-request handler tasks.
//!
//! [`PendingTable`]: camtunnel_core::pending::PendingTable

pub mod client;
pub mod dispatcher;
pub mod handler;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::fs_provider::FilesystemProvider;
use self::writer::MessageSender;

pub struct TunnelSession {
    pub device_id: String,
    pub writer_tx: MessageSender,
    pub fs: Arc<FilesystemProvider>,
    pub chunk_size_bytes: usize,
    last_frame_at: Mutex<Instant>,
    shutdown: Notify,
}

impl TunnelSession {
    pub fn new(device_id: String, writer_tx: MessageSender, fs: Arc<FilesystemProvider>, chunk_size_bytes: usize) -> Self {
        Self {
            device_id,
            writer_tx,
            fs,
            chunk_size_bytes,
            last_frame_at: Mutex::new(Instant::now()),
            shutdown: Notify::new(),
        }
    }

    pub fn touch(&self) {
        *self.last_frame_at.lock() = Instant::now();
    }

    pub fn deadline_at(&self, timeout: Duration) -> Instant {
        *self.last_frame_at.lock() + timeout
    }

    pub fn close(&self) {
        self.shutdown.notify_waiters();
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }

    pub async fn send(&self, message: Message) -> bool {
        self.writer_tx.send(message).await.is_ok()
    }
}
