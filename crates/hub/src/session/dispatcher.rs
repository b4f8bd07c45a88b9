//! Reads frames off a device's WebSocket stream and routes them into its
//! pending-request table. Grounded on the agent's `tunnel::dispatcher`
//! read loop: race the next frame against a liveness deadline, decode,
//! dispatch by type, keep going until the socket or the deadline gives out.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use camtunnel_core::frame::{decode_binary, decode_text, encode_text};
use camtunnel_core::pending::ReplyOutcome;
use camtunnel_core::protocol::{tag, ErrorPayload};
use futures_util::stream::{SplitStream, StreamExt};
use tracing::{debug, warn};

use super::{CloseReason, TunnelSession};

pub async fn run(
    mut stream: SplitStream<axum::extract::ws::WebSocket>,
    session: Arc<TunnelSession>,
    heartbeat_timeout: Duration,
) {
    loop {
        let message = tokio::select! {
            msg = stream.next() => msg,
            _ = session.wait_for_shutdown() => {
                debug!(device_id = %session.device_id, "session closed locally, stopping reader");
                return;
            }
            _ = tokio::time::sleep_until(session.deadline_at(heartbeat_timeout)) => {
                warn!(device_id = %session.device_id, "heartbeat timeout, closing session");
                session.close(CloseReason::HeartbeatTimeout).await;
                return;
            }
        };

        let message = match message {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(device_id = %session.device_id, error = %e, "websocket read error");
                session.close(CloseReason::TransportError).await;
                return;
            }
            None => {
                debug!(device_id = %session.device_id, "device closed the websocket");
                session.close(CloseReason::TransportError).await;
                return;
            }
        };

        session.touch();

        match message {
            Message::Text(text) => {
                let decoded = match decode_text(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(device_id = %session.device_id, error = %e, "malformed text frame");
                        session.close(CloseReason::DecodeError).await;
                        return;
                    }
                };

                match decoded.kind.as_str() {
                    tag::LIST_VIDEOS_RES | tag::READ_FILE_META => {
                        session.pending().complete_reply(decoded.id, ReplyOutcome::Payload(decoded.payload));
                    }
                    tag::ERROR => {
                        let error = serde_json::from_value::<ErrorPayload>(decoded.payload)
                            .unwrap_or_else(|_| ErrorPayload::new("malformed_error", "agent sent an unparseable ERROR frame"));
                        session.pending().complete_reply(decoded.id, ReplyOutcome::Error(error));
                    }
                    tag::PING => {
                        // Application-level fallback heartbeat: echo PONG
                        // with the same id. The primary liveness mechanism
                        // is the WebSocket-level ping the hub sends on a
                        // timer (see `heartbeat::spawn`).
                        if let Ok(text) = encode_text(decoded.id, tag::PONG, &serde_json::json!({})) {
                            let _ = session.writer_tx.send(Message::Text(text.into())).await;
                        }
                    }
                    tag::PONG => {}
                    other => {
                        warn!(device_id = %session.device_id, kind = other, "unknown frame type, closing session");
                        session.close(CloseReason::DecodeError).await;
                        return;
                    }
                }
            }
            Message::Binary(data) => match decode_binary(bytes::Bytes::from(data)) {
                Ok(chunk) => {
                    session.pending().push_chunk(chunk.request_id, chunk.payload).await;
                }
                Err(e) => {
                    warn!(device_id = %session.device_id, error = %e, "malformed binary frame");
                    session.close(CloseReason::DecodeError).await;
                    return;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!(device_id = %session.device_id, "received websocket close frame");
                session.close(CloseReason::TransportError).await;
                return;
            }
        }
    }
}
