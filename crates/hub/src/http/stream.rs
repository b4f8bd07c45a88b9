//! Range-aware video streaming endpoint (SPEC_FULL §4.4 step 3).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use camtunnel_core::protocol::ReadFileRequest;
use serde::Deserialize;

use super::{dispatch_error_response, AppState};
use crate::session::{DispatchError, TunnelSession};

struct CancelOnDrop {
    session: Arc<TunnelSession>,
    request_id: uuid::Uuid,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.session.cancel(self.request_id);
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub camera_id: String,
}

struct ByteRange {
    start: u64,
    end: Option<u64>,
}

pub async fn read_video(
    State(state): State<Arc<AppState>>,
    Path((device_id, filename)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Response {
    if !is_safe_filename(&filename) {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    }

    let range = match parse_range(headers.get(header::RANGE)) {
        Ok(r) => r,
        Err(()) => return (StatusCode::RANGE_NOT_SATISFIABLE).into_response(),
    };

    let Some(session) = state.registry.get(&device_id) else {
        return dispatch_error_response(DispatchError::NoSession);
    };

    let (start, end) = match &range {
        Some(r) => (r.start, r.end),
        None => (0, None),
    };

    let request = ReadFileRequest {
        camera_id: query.camera_id,
        filename,
        start,
        end,
    };

    let (request_id, meta, mut chunks) = match session.dispatch_read(request, state.request_deadline).await {
        Ok(triple) => triple,
        Err(e) => return dispatch_error_response(e),
    };

    let total_size = meta.total_size;
    if start >= total_size {
        // `start` defaults to 0 when no `Range` header was sent, so a
        // zero-length file with no range request lands here too — that
        // case is a plain empty `200`, not an out-of-bounds range.
        if range.is_none() {
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "video/mp4")
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_LENGTH, "0")
                .body(Body::empty())
                .unwrap();
        }
        return Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{total_size}"))
            .body(Body::empty())
            .unwrap();
    }

    let end_inclusive = end.unwrap_or(total_size.saturating_sub(1)).min(total_size.saturating_sub(1));
    let content_length = end_inclusive.saturating_sub(start) + 1;

    // Cancelling the PendingRequest when the body stream is dropped (the
    // HTTP client disconnected mid-transfer) stops the hub from buffering
    // chunks nobody will read; it does not reach the agent (SPEC_FULL §9).
    let cancel_guard = CancelOnDrop { session: session.clone(), request_id };
    let body = Body::from_stream(async_stream::stream! {
        let _cancel_guard = cancel_guard;
        while let Some(chunk) = chunks.recv().await {
            yield Ok::<_, std::io::Error>(chunk);
        }
    });

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length.to_string());

    if range.is_some() {
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end_inclusive}/{total_size}"));
    } else {
        builder = builder.status(StatusCode::OK);
    }

    builder.body(body).unwrap()
}

fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
        && !filename.contains('\0')
}

/// Parse a single `bytes=<start>-<end>?` range header. Returns `Ok(None)`
/// when there is no `Range` header, `Err(())` for multi-range, non-byte
/// units, or a malformed range (all surfaced as `416`).
fn parse_range(header: Option<&axum::http::HeaderValue>) -> Result<Option<ByteRange>, ()> {
    let Some(header) = header else { return Ok(None) };
    let value = header.to_str().map_err(|_| ())?;
    let spec = value.strip_prefix("bytes=").ok_or(())?;
    if spec.contains(',') {
        return Err(());
    }
    let (start_str, end_str) = spec.split_once('-').ok_or(())?;
    let start: u64 = start_str.parse().map_err(|_| ())?;
    let end = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse::<u64>().map_err(|_| ())?)
    };
    if let Some(end) = end {
        if end < start {
            return Err(());
        }
    }
    Ok(Some(ByteRange { start, end }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn header(v: &str) -> HeaderValue {
        HeaderValue::from_str(v).unwrap()
    }

    #[test]
    fn no_range_header_is_full_content() {
        assert!(parse_range(None).unwrap().is_none());
    }

    #[test]
    fn parses_bounded_range() {
        let r = parse_range(Some(&header("bytes=100-199"))).unwrap().unwrap();
        assert_eq!(r.start, 100);
        assert_eq!(r.end, Some(199));
    }

    #[test]
    fn parses_open_ended_range() {
        let r = parse_range(Some(&header("bytes=500-"))).unwrap().unwrap();
        assert_eq!(r.start, 500);
        assert_eq!(r.end, None);
    }

    #[test]
    fn rejects_multi_range() {
        assert!(parse_range(Some(&header("bytes=0-10,20-30"))).is_err());
    }

    #[test]
    fn rejects_non_byte_unit() {
        assert!(parse_range(Some(&header("items=0-10"))).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(parse_range(Some(&header("bytes=100-50"))).is_err());
    }

    #[test]
    fn rejects_path_traversal_filenames() {
        assert!(!is_safe_filename("../etc/passwd"));
        assert!(!is_safe_filename("a/../../etc/passwd"));
        assert!(!is_safe_filename("sub/dir.mp4"));
        assert!(is_safe_filename("20231123_14:30.mp4"));
    }
}
