//! Proxy-side tunnel session: one per live device connection.
//!
//! Wraps a single WebSocket connection's writer channel and pending-request
//! table, and tracks session liveness (SPEC_FULL §4.2, §4.3).

pub mod dispatcher;
pub mod handshake;
pub mod heartbeat;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use camtunnel_core::frame::encode_text;
use camtunnel_core::pending::{PendingTable, ReplyOutcome, RequestKind};
use camtunnel_core::protocol::{tag, ErrorPayload, ListVideosRequest, ListVideosResponse, ReadFileMeta, ReadFileRequest};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::warn;

use self::writer::MessageSender;

/// Why a session ended. Surfaced in logs and to anything awaiting the
/// session's pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AuthFailed,
    Superseded,
    HeartbeatTimeout,
    DecodeError,
    TransportError,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::AuthFailed => "auth_failed",
            CloseReason::Superseded => "superseded",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::DecodeError => "decode_error",
            CloseReason::TransportError => "transport_error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No session is registered for this device at all.
    #[error("no session registered for this device")]
    NoSession,
    /// A session existed but died before or during this request.
    #[error("device session disconnected")]
    Disconnected,
    #[error("device did not reply before the request deadline")]
    Timeout,
    #[error("agent reported an error: {0}")]
    Agent(#[from] DispatchAgentError),
}

#[derive(Debug, thiserror::Error)]
#[error("{}: {}", .0.code, .0.message)]
pub struct DispatchAgentError(pub ErrorPayload);

struct Inner {
    closed: bool,
    reason: Option<CloseReason>,
}

/// A live connection to one device agent.
pub struct TunnelSession {
    pub device_id: String,
    pub camera_ids: Vec<String>,
    writer_tx: MessageSender,
    pending: PendingTable,
    last_frame_at: Mutex<Instant>,
    state: Mutex<Inner>,
    shutdown: Notify,
}

impl TunnelSession {
    pub fn new(device_id: String, camera_ids: Vec<String>, writer_tx: MessageSender) -> Self {
        Self {
            device_id,
            camera_ids,
            writer_tx,
            pending: PendingTable::new(),
            last_frame_at: Mutex::new(Instant::now()),
            state: Mutex::new(Inner {
                closed: false,
                reason: None,
            }),
            shutdown: Notify::new(),
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Record that a frame was just received, resetting the liveness clock.
    pub fn touch(&self) {
        *self.last_frame_at.lock() = Instant::now();
    }

    pub fn deadline_at(&self, timeout: Duration) -> Instant {
        *self.last_frame_at.lock() + timeout
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().reason
    }

    /// Mark the session closed, fail every pending request, and wake the
    /// dispatcher loop so it stops reading and tears the socket down.
    pub async fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.reason = Some(reason);
        }
        self.pending.fail_all_disconnected();
        self.shutdown.notify_waiters();
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }

    async fn send_text(&self, text: String) -> Result<(), DispatchError> {
        self.writer_tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| DispatchError::Disconnected)
    }

    pub async fn dispatch_list(
        &self,
        req: ListVideosRequest,
        deadline: Duration,
    ) -> Result<ListVideosResponse, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Disconnected);
        }
        let pending_req = self.pending.insert(RequestKind::List);
        let text = encode_text(pending_req.id, tag::LIST_VIDEOS, &req)
            .map_err(|_| DispatchError::Disconnected)?;
        self.send_text(text).await?;

        match tokio::time::timeout(deadline, pending_req.reply_rx).await {
            Err(_) => {
                self.pending.cancel(pending_req.id);
                Err(DispatchError::Timeout)
            }
            Ok(Err(_)) => Err(DispatchError::Disconnected),
            Ok(Ok(outcome)) => match outcome {
                ReplyOutcome::Payload(value) => serde_json::from_value(value).map_err(|e| {
                    warn!(error = %e, "agent LIST_VIDEOS_RES did not match the expected shape");
                    DispatchError::Agent(DispatchAgentError(ErrorPayload::new(
                        "malformed_reply",
                        "agent reply did not match the expected shape",
                    )))
                }),
                ReplyOutcome::Error(e) => Err(DispatchError::Agent(DispatchAgentError(e))),
                ReplyOutcome::Cancelled | ReplyOutcome::Disconnected => {
                    Err(DispatchError::Disconnected)
                }
            },
        }
    }

    /// Issue a `READ_FILE` request. On success, returns the request id (so
    /// the caller can [`cancel`](Self::cancel) it on client disconnect), the
    /// declared total size, and a channel yielding the binary chunks that
    /// follow; the channel closes (normally or on a mid-stream agent error)
    /// when the stream ends.
    pub async fn dispatch_read(
        &self,
        req: ReadFileRequest,
        deadline: Duration,
    ) -> Result<(uuid::Uuid, ReadFileMeta, mpsc::Receiver<Bytes>), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Disconnected);
        }
        let pending_req = self.pending.insert(RequestKind::Read);
        let id = pending_req.id;
        let text = encode_text(id, tag::READ_FILE, &req).map_err(|_| DispatchError::Disconnected)?;
        self.send_text(text).await?;

        let meta = match tokio::time::timeout(deadline, pending_req.reply_rx).await {
            Err(_) => {
                self.pending.cancel(id);
                return Err(DispatchError::Timeout);
            }
            Ok(Err(_)) => return Err(DispatchError::Disconnected),
            Ok(Ok(ReplyOutcome::Payload(value))) => {
                serde_json::from_value::<ReadFileMeta>(value).map_err(|e| {
                    warn!(error = %e, "agent READ_FILE_META did not match the expected shape");
                    DispatchError::Agent(DispatchAgentError(ErrorPayload::new(
                        "malformed_reply",
                        "agent reply did not match the expected shape",
                    )))
                })?
            }
            Ok(Ok(ReplyOutcome::Error(e))) => return Err(DispatchError::Agent(DispatchAgentError(e))),
            Ok(Ok(ReplyOutcome::Cancelled | ReplyOutcome::Disconnected)) => {
                return Err(DispatchError::Disconnected)
            }
        };

        let stream_rx = pending_req
            .stream_rx
            .expect("Read requests always allocate a stream channel");
        Ok((id, meta, stream_rx))
    }

    /// Cancel a request client-side, e.g. the HTTP client disconnected
    /// mid-download. Best-effort: there is no on-wire cancel frame
    /// (SPEC_FULL §9), so this only stops local delivery — the agent keeps
    /// streaming until it notices the dead TCP connection on its own.
    pub fn cancel(&self, id: uuid::Uuid) {
        self.pending.cancel(id);
    }
}

#[cfg(test)]
mod tests {
    use camtunnel_core::frame::decode_text;
    use camtunnel_core::protocol::ReadFileMeta;

    use super::*;

    /// Read the one outgoing `READ_FILE` frame a `dispatch_read` call sends,
    /// then act as the agent: feed a meta reply and the requested byte
    /// range's chunks straight into the session's own pending table, the
    /// same calls the dispatcher would make after decoding them off the
    /// wire. Runs once per call, matching `dispatch_read`'s single request.
    async fn answer_one_read(session: &Arc<TunnelSession>, writer_rx: &mut mpsc::Receiver<Message>, file: &[u8], chunk_len: usize) {
        let Message::Text(text) = writer_rx.recv().await.expect("agent never saw a READ_FILE frame") else {
            panic!("expected a text frame");
        };
        let decoded = decode_text(&text).unwrap();
        assert_eq!(decoded.kind, tag::READ_FILE);
        let req: ReadFileRequest = serde_json::from_value(decoded.payload).unwrap();

        let total_size = file.len() as u64;
        let end = req.end.unwrap_or(total_size - 1).min(total_size - 1);
        let slice = &file[req.start as usize..=end as usize];

        session
            .pending()
            .complete_reply(decoded.id, ReplyOutcome::Payload(serde_json::to_value(ReadFileMeta { total_size }).unwrap()));
        for chunk in slice.chunks(chunk_len) {
            session.pending().push_chunk(decoded.id, bytes::Bytes::copy_from_slice(chunk)).await;
        }
        session.pending().push_chunk(decoded.id, bytes::Bytes::new()).await;
    }

    #[tokio::test]
    async fn range_request_delivers_byte_exact_slice() {
        let (writer_tx, mut writer_rx) = mpsc::channel(32);
        let session = Arc::new(TunnelSession::new("pi-a".into(), vec!["cam1".into()], writer_tx));

        let file: Vec<u8> = (0u8..=255).cycle().take(10_240).collect();
        let req = ReadFileRequest {
            camera_id: "cam1".into(),
            filename: "20231123_14:30.mp4".into(),
            start: 1024,
            end: Some(2047),
        };

        let session_for_agent = session.clone();
        let file_for_agent = file.clone();
        let agent = tokio::spawn(async move {
            answer_one_read(&session_for_agent, &mut writer_rx, &file_for_agent, 256).await;
        });

        let (_id, meta, mut chunks) = session.dispatch_read(req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(meta.total_size, 10_240);

        let mut received = Vec::new();
        while let Some(chunk) = chunks.recv().await {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, file[1024..=2047]);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_reads_on_one_session_never_cross_streams() {
        let (writer_tx, mut writer_rx) = mpsc::channel(64);
        let session = Arc::new(TunnelSession::new("pi-a".into(), vec!["cam1".into()], writer_tx));
        let file: Vec<u8> = (0u8..=255).cycle().take(4096).collect();

        let agent_session = session.clone();
        let agent_file = file.clone();
        let agent = tokio::spawn(async move {
            for _ in 0..8 {
                answer_one_read(&agent_session, &mut writer_rx, &agent_file, 64).await;
            }
        });

        let ranges: Vec<(u64, u64)> = (0..8).map(|i| (i * 128, i * 128 + 127)).collect();
        let mut handles = Vec::new();
        for (start, end) in ranges.clone() {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let req = ReadFileRequest {
                    camera_id: "cam1".into(),
                    filename: "f.mp4".into(),
                    start,
                    end: Some(end),
                };
                let (_id, _meta, mut chunks) = session.dispatch_read(req, Duration::from_secs(5)).await.unwrap();
                let mut received = Vec::new();
                while let Some(chunk) = chunks.recv().await {
                    received.extend_from_slice(&chunk);
                }
                (start, end, received)
            }));
        }

        for handle in handles {
            let (start, end, received) = handle.await.unwrap();
            assert_eq!(received, file[start as usize..=end as usize], "range {start}-{end} crossed streams");
        }
        agent.await.unwrap();
    }
}
