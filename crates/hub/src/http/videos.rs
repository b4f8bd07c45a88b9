use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use camtunnel_core::protocol::ListVideosRequest;
use serde::Deserialize;

use super::{dispatch_error_response, AppState};
use crate::session::DispatchError;

#[derive(Debug, Deserialize)]
pub struct VideosQuery {
    pub camera_id: String,
    pub date: Option<String>,
    pub hour: Option<u8>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_videos(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<VideosQuery>,
) -> Response {
    let Some(session) = state.registry.get(&device_id) else {
        return dispatch_error_response(DispatchError::NoSession);
    };

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(state.default_page_size)
        .clamp(1, state.max_page_size);

    let request = ListVideosRequest {
        camera_id: query.camera_id,
        date: query.date,
        hour: query.hour,
        page,
        page_size,
    };

    match session.dispatch_list(request, state.request_deadline).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => dispatch_error_response(e),
    }
}
