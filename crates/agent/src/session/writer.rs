//! Dedicated WebSocket writer task, mirroring the hub's
//! `camtunnel_hub::session::writer` — a single writer task fed by an mpsc
//! channel so request replies and heartbeat pongs never interleave writes.
//!
//! Unlike the hub, the agent never initiates a ping of its own (SPEC_FULL
//! §4.2 assigns that responsibility to the hub); this task is a plain sink
//! drain.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
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
                error!(error = %e, "failed to write to hub websocket");
                break;
            }
        }
        debug!("tunnel writer task exiting");
        let _ = sink.close().await;
    });

    (tx, handle)
}
