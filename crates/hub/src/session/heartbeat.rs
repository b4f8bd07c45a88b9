//! Periodic WebSocket-level ping so an idle device still gives the read
//! loop's stale-connection check something to observe (SPEC_FULL §4.2
//! "Heartbeat").

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;

use super::TunnelSession;

/// Send a `Ping` every third of the heartbeat timeout until the session
/// closes. Exits quietly once the writer channel is gone.
pub fn spawn(session: Arc<TunnelSession>, heartbeat_timeout: Duration) -> JoinHandle<()> {
    let interval = (heartbeat_timeout / 3).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if session.is_closed() {
                        return;
                    }
                    if session.writer_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return;
                    }
                }
                _ = session.wait_for_shutdown() => return,
            }
        }
    })
}
