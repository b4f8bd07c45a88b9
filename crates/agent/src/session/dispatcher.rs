//! Reads frames off the hub's WebSocket stream and spawns one handler task
//! per incoming request. Grounded on the hub's own
//! `camtunnel_hub::session::dispatcher` read loop and the teacher's
//! `tunnel/dispatcher.rs` `handler_handles`/`drain_handlers` bookkeeping,
//! simplified: the hub never streams a request body or sends an on-wire
//! cancel frame (SPEC_FULL §9), so there is no per-stream incoming-body
//! channel map here, just a task per request.

use std::sync::Arc;
use std::time::Duration;

use camtunnel_core::frame::{decode_binary, decode_text, encode_text};
use camtunnel_core::protocol::tag;
use futures_util::stream::{SplitStream, Stream as FutStream, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{handler, TunnelSession};

pub async fn run<S>(mut stream: SplitStream<S>, session: Arc<TunnelSession>, heartbeat_timeout: Duration)
where
    S: FutStream<Item = Result<Message, WsError>> + Unpin,
{
    let mut handler_handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let message = tokio::select! {
            msg = stream.next() => msg,
            _ = session.wait_for_shutdown() => {
                debug!(device_id = %session.device_id, "session closed locally, stopping reader");
                break;
            }
            _ = tokio::time::sleep_until(session.deadline_at(heartbeat_timeout)) => {
                warn!(device_id = %session.device_id, "heartbeat timeout, reconnecting");
                break;
            }
        };

        let message = match message {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(device_id = %session.device_id, error = %e, "websocket read error");
                break;
            }
            None => {
                debug!(device_id = %session.device_id, "hub closed the websocket");
                break;
            }
        };

        session.touch();

        match message {
            Message::Text(text) => {
                let decoded = match decode_text(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(device_id = %session.device_id, error = %e, "malformed text frame, reconnecting");
                        break;
                    }
                };

                match decoded.kind.as_str() {
                    tag::LIST_VIDEOS => {
                        let Ok(req) = serde_json::from_value(decoded.payload) else {
                            warn!(device_id = %session.device_id, "malformed LIST_VIDEOS payload");
                            continue;
                        };
                        let session = session.clone();
                        handler_handles.push(tokio::spawn(handler::handle_list_videos(session, decoded.id, req)));
                    }
                    tag::READ_FILE => {
                        let Ok(req) = serde_json::from_value(decoded.payload) else {
                            warn!(device_id = %session.device_id, "malformed READ_FILE payload");
                            continue;
                        };
                        let session = session.clone();
                        handler_handles.push(tokio::spawn(handler::handle_read_file(session, decoded.id, req)));
                    }
                    tag::PING => {
                        if let Ok(text) = encode_text(decoded.id, tag::PONG, &serde_json::json!({})) {
                            let _ = session.send(Message::Text(text.into())).await;
                        }
                    }
                    tag::PONG => {}
                    other => {
                        warn!(device_id = %session.device_id, kind = other, "unknown frame type from hub, reconnecting");
                        break;
                    }
                }
            }
            Message::Binary(data) => {
                // The hub never sends us binary frames (request bodies are
                // never streamed hub->agent); treat one as a protocol
                // violation.
                let decode_ok = decode_binary(bytes::Bytes::from(data)).is_ok();
                warn!(device_id = %session.device_id, decode_ok, "unexpected binary frame from hub, reconnecting");
                break;
            }
            Message::Close(_) => {
                debug!(device_id = %session.device_id, "received websocket close frame");
                break;
            }
            _ => {}
        }

        handler_handles.retain(|h| !h.is_finished());
    }

    session.close();
    for handle in handler_handles {
        handle.abort();
    }
}
