use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::AppState;

pub async fn list_cameras(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cameras = state.registry.list_cameras();
    Json(serde_json::json!({
        "total": cameras.len(),
        "cameras": cameras,
    }))
}
