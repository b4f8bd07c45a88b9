//! Dedicated WebSocket writer task.
//!
//! All outgoing frames for a session go through an mpsc channel to a single
//! writer task, so request dispatch and heartbeat replies never interleave
//! writes on the socket.

use axum::extract::ws::Message;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub type MessageSender = mpsc::Sender<Message>;

pub const WRITER_CHANNEL_DEPTH: usize = 256;

pub fn spawn_writer<S>(mut sink: S) -> (MessageSender, JoinHandle<()>)
where
    S: SinkExt<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
{
    let (tx, mut rx) = mpsc::channel::<Message>(WRITER_CHANNEL_DEPTH);

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(message).await {
                error!(error = %e, "failed to write to device websocket");
                break;
            }
        }
        debug!("session writer task exiting");
        let _ = sink.close().await;
    });

    (tx, handle)
}
