//! Device registry: at most one live session per `device_id`.
//!
//! A second connection for a device that already has a live session
//! supersedes it — the old session is closed with `Superseded` and the new
//! one takes its slot (SPEC_FULL §4.3, invariant I-REG-1).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::{CloseReason, TunnelSession};

#[derive(Debug, Clone, serde::Serialize)]
pub struct CameraSummary {
    pub device_id: String,
    pub camera_id: String,
}

#[derive(Default)]
pub struct DeviceRegistry {
    sessions: RwLock<HashMap<String, Arc<TunnelSession>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` as the live session for its `device_id`. If a
    /// session is already registered for that device, it is returned so the
    /// caller can close it with [`CloseReason::Superseded`] outside the lock.
    pub fn register(&self, session: Arc<TunnelSession>) -> Option<Arc<TunnelSession>> {
        self.sessions
            .write()
            .insert(session.device_id.clone(), session)
    }

    /// Remove `device_id`'s session, but only if it is still `session`
    /// (identity check) — a session that has already been superseded must
    /// not deregister the session that replaced it.
    pub fn deregister(&self, device_id: &str, session: &Arc<TunnelSession>) {
        let mut sessions = self.sessions.write();
        if let Some(current) = sessions.get(device_id) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(device_id);
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<TunnelSession>> {
        self.sessions.read().get(device_id).cloned()
    }

    /// All cameras currently reachable through a live session, in no
    /// particular order.
    pub fn list_cameras(&self) -> Vec<CameraSummary> {
        self.sessions
            .read()
            .values()
            .flat_map(|session| {
                let device_id = session.device_id.clone();
                session
                    .camera_ids
                    .iter()
                    .map(move |camera_id| CameraSummary {
                        device_id: device_id.clone(),
                        camera_id: camera_id.clone(),
                    })
            })
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Close every live session, e.g. on hub shutdown.
    pub async fn close_all(&self, reason: CloseReason) {
        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close(reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(device_id: &str, cameras: &[&str]) -> Arc<TunnelSession> {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        Arc::new(TunnelSession::new(
            device_id.to_string(),
            cameras.iter().map(|c| c.to_string()).collect(),
            tx,
        ))
    }

    #[tokio::test]
    async fn second_registration_supersedes_first() {
        let registry = DeviceRegistry::new();
        let first = test_session("pi-a", &["cam1"]);
        assert!(registry.register(first.clone()).is_none());

        let second = test_session("pi-a", &["cam1"]);
        let superseded = registry.register(second.clone()).expect("must return the replaced session");
        assert!(Arc::ptr_eq(&superseded, &first));
        assert!(Arc::ptr_eq(&registry.get("pi-a").unwrap(), &second));
    }

    #[tokio::test]
    async fn deregister_ignores_already_superseded_session() {
        let registry = DeviceRegistry::new();
        let first = test_session("pi-a", &["cam1"]);
        registry.register(first.clone());
        let second = test_session("pi-a", &["cam1"]);
        registry.register(second.clone());

        // The old session's own cleanup path must not evict its replacement.
        registry.deregister("pi-a", &first);
        assert!(Arc::ptr_eq(&registry.get("pi-a").unwrap(), &second));

        registry.deregister("pi-a", &second);
        assert!(registry.get("pi-a").is_none());
    }

    #[tokio::test]
    async fn list_cameras_flattens_across_devices() {
        let registry = DeviceRegistry::new();
        registry.register(test_session("pi-a", &["cam1", "cam2"]));
        registry.register(test_session("pi-b", &["cam3"]));

        let mut cameras = registry.list_cameras();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        assert_eq!(cameras.len(), 3);
        assert_eq!(cameras[0].camera_id, "cam1");
        assert_eq!(cameras[2].camera_id, "cam3");
    }
}
