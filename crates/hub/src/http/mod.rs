//! HTTP + WebSocket surface (SPEC_FULL §4.4).
//!
//! Three read endpoints under `/api/` translate into tunnel dispatches, plus
//! a `/tunnel` WebSocket upgrade endpoint that device agents connect to.

mod cameras;
mod stream;
mod videos;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::DeviceRegistry;
use crate::session::DispatchError;

pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub device_token: String,
    pub handshake_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub request_deadline: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/tunnel", get(accept_tunnel))
        .route("/api/cameras", get(cameras::list_cameras))
        .route("/api/devices/{device_id}/videos", get(videos::list_videos))
        .route("/api/devices/{device_id}/videos/{filename}", get(stream::read_video))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match cors_layer(cors_origins) {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allowed: Vec<_> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    Some(CorsLayer::new().allow_origin(AllowOrigin::list(allowed)).allow_methods([http::Method::GET]))
}

async fn accept_tunnel(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        crate::session::handshake::run(
            socket,
            state.device_token.clone(),
            state.handshake_timeout,
            state.registry.clone(),
            state.heartbeat_timeout,
        )
        .await;
    })
}

/// Shared mapping from a failed tunnel dispatch to an HTTP error response.
pub(crate) fn dispatch_error_response(err: DispatchError) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::Json;

    let (status, code, message) = match &err {
        DispatchError::NoSession => (
            StatusCode::SERVICE_UNAVAILABLE,
            "device_unavailable".to_string(),
            "no session registered for this device".to_string(),
        ),
        DispatchError::Disconnected => (
            StatusCode::BAD_GATEWAY,
            "device_disconnected".to_string(),
            "device session disconnected".to_string(),
        ),
        DispatchError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "request_timeout".to_string(),
            "device did not reply in time".to_string(),
        ),
        DispatchError::Agent(agent_err) => {
            let status = match agent_err.0.code.as_str() {
                "not_found" => StatusCode::NOT_FOUND,
                "forbidden" => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, agent_err.0.code.clone(), agent_err.0.message.clone())
        }
    };

    (status, Json(serde_json::json!({ "code": code, "message": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::session::TunnelSession;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            registry: Arc::new(DeviceRegistry::new()),
            device_token: "secret".to_string(),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            request_deadline: Duration::from_secs(10),
            default_page_size: 20,
            max_page_size: 200,
        })
    }

    fn fake_session(device_id: &str, cameras: &[&str]) -> Arc<TunnelSession> {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        Arc::new(TunnelSession::new(
            device_id.to_string(),
            cameras.iter().map(|c| c.to_string()).collect(),
            tx,
        ))
    }

    #[tokio::test]
    async fn lists_cameras_across_registered_devices() {
        let state = test_state();
        state.registry.register(fake_session("pi-a", &["front", "back"]));
        state.registry.register(fake_session("pi-b", &["garage"]));

        let app = router(state, &[]);
        let response = app
            .oneshot(Request::builder().uri("/api/cameras").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["cameras"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unregistered_device_list_videos_returns_503() {
        let state = test_state();
        let app = router(state, &[]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/unknown-pi/videos?camera_id=front")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn path_traversal_filename_is_rejected_before_dispatch() {
        let state = test_state();
        // The device is never registered, so a 400 here can only come from
        // the filename check running before any tunnel dispatch is attempted.
        let app = router(state, &[]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/pi-a/videos/..%2f..%2fetc%2fpasswd?camera_id=front")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
