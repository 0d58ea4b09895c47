//! Idle session timers
//!
//! One cancellable timer per session. The timer only decides *when* to look;
//! the expiry action re-checks actual session state before disconnecting,
//! because requests can land during the final stretch of the wait.

use crate::types::SessionId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-session cancellable delayed actions
#[derive(Clone)]
pub struct IdleTimeoutManager {
    timers: Arc<Mutex<HashMap<SessionId, CancellationToken>>>,
    timeout: Duration,
}

impl IdleTimeoutManager {
    /// Create a manager with the given idle timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Schedule `on_expire` to run after the idle timeout
    ///
    /// Replaces any timer already scheduled for the session. The callback
    /// itself is responsible for re-checking that the session is still idle.
    pub async fn schedule<F, Fut>(&self, session: SessionId, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let previous = self.timers.lock().await.insert(session, token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        debug!(%session, timeout_secs = self.timeout.as_secs(), "idle timer scheduled");
        let timers = self.timers.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(%session, "idle timer cancelled");
                }
                _ = tokio::time::sleep(timeout) => {
                    // A replacement cancels the old token, so an uncancelled
                    // token is still the one stored in the map
                    if token.is_cancelled() {
                        return;
                    }
                    timers.lock().await.remove(&session);
                    debug!(%session, "idle timer expired");
                    on_expire().await;
                }
            }
        });
    }

    /// Cancel a session's timer. Returns whether one was scheduled.
    pub async fn cancel(&self, session: SessionId) -> bool {
        match self.timers.lock().await.remove(&session) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is currently scheduled for the session
    pub async fn is_scheduled(&self, session: SessionId) -> bool {
        self.timers.lock().await.contains_key(&session)
    }

    /// Cancel every timer (shutdown)
    pub async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, token) in timers.drain() {
            token.cancel();
        }
    }
}
