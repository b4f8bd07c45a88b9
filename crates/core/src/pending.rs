//! Proxy-side bookkeeping for in-flight tunnel requests: a `requestId` ->
//! `PendingRequest` table, each entry holding a single-shot reply slot and,
//! for streaming requests, a bounded byte channel (SPEC_FULL §3, §4.2).

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::protocol::ErrorPayload;

/// What kind of reply shape a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Single structured reply only (`LIST_VIDEOS`).
    List,
    /// Dual-mode: a small meta reply, then a binary stream (`READ_FILE`).
    Read,
}

/// Terminal outcome delivered through a request's reply slot.
#[derive(Debug)]
pub enum ReplyOutcome {
    /// A structured JSON payload (e.g. `LIST_VIDEOS_RES`, or `READ_FILE_META`
    /// for a `Read` request).
    Payload(serde_json::Value),
    /// The agent reported an application-level error.
    Error(ErrorPayload),
    /// The dispatcher cancelled this request locally (e.g. client disconnect).
    Cancelled,
    /// The session died before a reply arrived.
    Disconnected,
}

/// Default bounded capacity for a request's binary-chunk channel, expressed
/// as a multiple of the agent's chunk size so a few chunks can queue up
/// without the agent blocking on every `send`.
pub const STREAM_CHANNEL_DEPTH: usize = 4;

struct Entry {
    kind: RequestKind,
    reply_tx: Option<oneshot::Sender<ReplyOutcome>>,
    stream_tx: Option<mpsc::Sender<Bytes>>,
}

/// A single outstanding request, owned by the dispatching task.
pub struct PendingRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub reply_rx: oneshot::Receiver<ReplyOutcome>,
    pub stream_rx: Option<mpsc::Receiver<Bytes>>,
}

/// Proxy-wide table of in-flight requests, keyed by `requestId`.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh request id, install a pending entry, and hand back
    /// the owning handle (receivers) to the caller.
    pub fn insert(&self, kind: RequestKind) -> PendingRequest {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let stream_tx_rx = matches!(kind, RequestKind::Read)
            .then(|| mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH));
        let (stream_tx, stream_rx) = match stream_tx_rx {
            Some((tx, rx)) => (Some(tx), Some(rx)),
            None => (None, None),
        };

        self.entries.lock().insert(
            id,
            Entry {
                kind,
                reply_tx: Some(reply_tx),
                stream_tx,
            },
        );

        PendingRequest {
            id,
            kind,
            reply_rx,
            stream_rx,
        }
    }

    /// Complete a request's reply slot with a terminal payload or error.
    /// Removes the entry unless it's a `Read` request whose stream channel
    /// is still open (the binary stream itself is the remaining terminal
    /// event in that case).
    ///
    /// A `Read` request's reply slot fires exactly once, for the initial
    /// `READ_FILE_META` (or an `ERROR` that preempts it). A second call for
    /// the same id — a mid-stream `ERROR` arriving after the meta reply —
    /// finds the reply slot already consumed and simply drops the entry,
    /// which closes the stream channel and lets the HTTP body writer stop
    /// (SPEC_FULL §7: mid-stream failure is an abrupt connection close,
    /// there is no in-band way to signal it once headers are sent).
    pub fn complete_reply(&self, id: Uuid, outcome: ReplyOutcome) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&id) else {
            tracing::warn!(request_id = %id, "reply for unknown/expired request, discarding");
            return;
        };

        let Some(tx) = entry.reply_tx.take() else {
            entries.remove(&id);
            return;
        };

        let keep_for_stream = matches!(outcome, ReplyOutcome::Payload(_))
            && entry.kind == RequestKind::Read
            && entry.stream_tx.is_some();

        let _ = tx.send(outcome);

        if !keep_for_stream {
            entries.remove(&id);
        }
    }

    /// Push a binary chunk onto a request's stream channel. Non-blocking
    /// from the caller's perspective is not guaranteed (backpressure is the
    /// point) — the reader task awaits this. An empty payload closes the
    /// channel and removes the entry (end-of-stream).
    pub async fn push_chunk(&self, id: Uuid, payload: Bytes) {
        let is_eos = payload.is_empty();
        let tx = {
            let entries = self.entries.lock();
            match entries.get(&id) {
                Some(entry) if entry.stream_tx.is_some() => entry.stream_tx.clone(),
                Some(_) => {
                    tracing::warn!(request_id = %id, "binary frame for non-streaming request, discarding");
                    return;
                }
                None => {
                    tracing::warn!(request_id = %id, "binary frame for unknown/expired request, discarding");
                    return;
                }
            }
        };

        let Some(tx) = tx else { return };

        if !is_eos {
            let _ = tx.send(payload).await;
            return;
        }

        // End-of-stream: drop our sender (closing the channel) and remove
        // the entry so later frames for this id are treated as unknown.
        drop(tx);
        self.entries.lock().remove(&id);
    }

    /// Cancel a request locally: complete its reply with `Cancelled` and
    /// drop its stream sender so the receiver sees the channel close.
    pub fn cancel(&self, id: Uuid) {
        if let Some(mut entry) = self.entries.lock().remove(&id) {
            if let Some(tx) = entry.reply_tx.take() {
                let _ = tx.send(ReplyOutcome::Cancelled);
            }
            entry.stream_tx = None;
        }
    }

    /// Fail every outstanding request with `Disconnected` and clear the
    /// table. Called when the owning session transitions to `Closed`.
    pub fn fail_all_disconnected(&self) {
        let mut entries = self.entries.lock();
        for (_, mut entry) in entries.drain() {
            if let Some(tx) = entry.reply_tx.take() {
                let _ = tx.send(ReplyOutcome::Disconnected);
            }
            entry.stream_tx = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// `Entry.stream_tx` needs Clone for `push_chunk`'s snapshot-then-await pattern.
impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            reply_tx: None,
            stream_tx: self.stream_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unique_ids_across_inserts() {
        let table = PendingTable::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            let req = table.insert(RequestKind::List);
            assert!(ids.insert(req.id), "duplicate request id allocated");
        }
    }

    #[tokio::test]
    async fn list_request_completes_and_removes_entry() {
        let table = PendingTable::new();
        let req = table.insert(RequestKind::List);
        assert_eq!(table.len(), 1);
        table.complete_reply(req.id, ReplyOutcome::Payload(serde_json::json!({"ok": true})));
        assert_eq!(table.len(), 0);
        let outcome = req.reply_rx.await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Payload(_)));
    }

    #[tokio::test]
    async fn read_request_keeps_entry_after_meta_until_stream_closes() {
        let table = PendingTable::new();
        let mut req = table.insert(RequestKind::Read);
        table.complete_reply(req.id, ReplyOutcome::Payload(serde_json::json!({"total_size": 10})));
        assert_eq!(table.len(), 1, "entry must survive meta reply until stream ends");

        table.push_chunk(req.id, Bytes::from_static(b"hello")).await;
        table.push_chunk(req.id, Bytes::new()).await;
        assert_eq!(table.len(), 0);

        let chunk = req.stream_rx.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(req.stream_rx.as_mut().unwrap().recv().await.is_none());
    }

    #[tokio::test]
    async fn error_reply_removes_read_entry_without_stream() {
        let table = PendingTable::new();
        let req = table.insert(RequestKind::Read);
        table.complete_reply(req.id, ReplyOutcome::Error(ErrorPayload::new("not_found", "nope")));
        assert_eq!(table.len(), 0);
        assert!(matches!(req.reply_rx.await.unwrap(), ReplyOutcome::Error(_)));
    }

    #[tokio::test]
    async fn mid_stream_error_after_meta_closes_channel_without_reply() {
        let table = PendingTable::new();
        let mut req = table.insert(RequestKind::Read);
        table.complete_reply(req.id, ReplyOutcome::Payload(serde_json::json!({"total_size": 5})));
        table.push_chunk(req.id, Bytes::from_static(b"part")).await;

        // Agent aborts mid-stream instead of sending a zero-length chunk.
        table.complete_reply(req.id, ReplyOutcome::Error(ErrorPayload::new("io_error", "disk read failed")));
        assert_eq!(table.len(), 0);

        let rx = req.stream_rx.as_mut().unwrap();
        assert_eq!(&rx.recv().await.unwrap()[..], b"part");
        assert!(rx.recv().await.is_none(), "channel must close, not deliver a second reply");
    }

    #[tokio::test]
    async fn fail_all_disconnects_every_pending_request() {
        let table = PendingTable::new();
        let a = table.insert(RequestKind::List);
        let b = table.insert(RequestKind::Read);
        table.fail_all_disconnected();
        assert!(table.is_empty());
        assert!(matches!(a.reply_rx.await.unwrap(), ReplyOutcome::Disconnected));
        assert!(matches!(b.reply_rx.await.unwrap(), ReplyOutcome::Disconnected));
    }

    #[tokio::test]
    async fn unknown_chunk_is_discarded_not_misrouted() {
        let table = PendingTable::new();
        let mut req = table.insert(RequestKind::Read);
        table.push_chunk(Uuid::new_v4(), Bytes::from_static(b"wrong")).await;
        table.push_chunk(req.id, Bytes::from_static(b"right")).await;
        let chunk = req.stream_rx.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(&chunk[..], b"right");
    }
}
