//! Per-request handlers: one task per incoming `LIST_VIDEOS`/`READ_FILE`
//! frame. Grounded on the hub's `aether-proxy/src/tunnel/stream_handler.rs`
//! shape (`handle_stream`), generalized from "proxy an upstream HTTP
//! response" to "serve a range of a local file".

use std::sync::Arc;

use camtunnel_core::frame::{encode_binary, encode_text};
use camtunnel_core::protocol::{tag, ErrorPayload, ListVideosRequest, ListVideosResponse, ReadFileMeta, ReadFileRequest};
use tokio::io::AsyncReadExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;
use uuid::Uuid;

use crate::fs_provider::{FsError, ListFilters};
use super::TunnelSession;

async fn send_error(session: &TunnelSession, id: Uuid, err: &FsError) {
    let payload = ErrorPayload::new(err.code(), err.to_string());
    if let Ok(text) = encode_text(id, tag::ERROR, &payload) {
        let _ = session.send(Message::Text(text.into())).await;
    }
}

pub async fn handle_list_videos(session: Arc<TunnelSession>, id: Uuid, req: ListVideosRequest) {
    let page = req.page.max(1);
    let page_size = req.page_size.max(1);

    let result = session
        .fs
        .list_videos(
            &req.camera_id,
            ListFilters {
                date: req.date,
                hour: req.hour,
                page,
                page_size,
            },
        )
        .await;

    match result {
        Ok((total, videos)) => {
            let total_pages = total.div_ceil(page_size as u64) as u32;
            let response = ListVideosResponse {
                videos,
                total,
                page,
                page_size,
                total_pages,
            };
            if let Ok(text) = encode_text(id, tag::LIST_VIDEOS_RES, &response) {
                let _ = session.send(Message::Text(text.into())).await;
            }
        }
        Err(e) => {
            warn!(request_id = %id, error = %e, "LIST_VIDEOS failed");
            send_error(&session, id, &e).await;
        }
    }
}

pub async fn handle_read_file(session: Arc<TunnelSession>, id: Uuid, req: ReadFileRequest) {
    let (path, total_size) = match session.fs.stat(&req.camera_id, &req.filename).await {
        Ok(v) => v,
        Err(e) => {
            warn!(request_id = %id, error = %e, "READ_FILE stat failed");
            send_error(&session, id, &e).await;
            return;
        }
    };

    // An out-of-range `start` is the hub's 416 to raise, not ours to
    // reject — we just report the size we have and stream nothing.
    let remaining_len = if total_size == 0 || req.start >= total_size {
        0
    } else {
        let end = req.end.unwrap_or(total_size - 1).min(total_size - 1);
        end.saturating_sub(req.start) + 1
    };

    let meta = ReadFileMeta { total_size };
    let text = match encode_text(id, tag::READ_FILE_META, &meta) {
        Ok(text) => text,
        Err(e) => {
            warn!(request_id = %id, error = %e, "failed to encode READ_FILE_META");
            return;
        }
    };
    if !session.send(Message::Text(text.into())).await {
        return;
    }

    if remaining_len == 0 {
        let _ = session.send(Message::Binary(encode_binary(id, b"").to_vec().into())).await;
        return;
    }

    let mut file = match session.fs.open_range(&path, req.start).await {
        Ok(f) => f,
        Err(e) => {
            warn!(request_id = %id, error = %e, "READ_FILE open failed after meta sent");
            return;
        }
    };

    let mut remaining = remaining_len;
    let mut buf = vec![0u8; session.chunk_size_bytes];
    loop {
        if remaining == 0 {
            break;
        }
        let want = (session.chunk_size_bytes as u64).min(remaining) as usize;
        let read = match file.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(request_id = %id, error = %e, "READ_FILE mid-stream read error, aborting without end-of-stream marker");
                return;
            }
        };
        let frame = encode_binary(id, &buf[..read]);
        if !session.send(Message::Binary(frame.to_vec().into())).await {
            return;
        }
        remaining -= read as u64;
    }

    let _ = session.send(Message::Binary(encode_binary(id, b"").to_vec().into())).await;
}
