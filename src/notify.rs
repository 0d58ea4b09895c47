//! User-facing notifications
//!
//! Notifications are strictly best-effort: the orchestrator logs and swallows
//! every failure, so a broken chat channel can never stall playback or block
//! an idle disconnect.

use crate::error::Result;
use crate::types::SessionId;
use async_trait::async_trait;
use tracing::info;

/// Sends human-readable messages to whatever channel a session is bound to
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message for the given session
    ///
    /// `channel` is the chat channel the session was bound to, if any;
    /// implementations without a channel concept may ignore it.
    async fn send(&self, session: SessionId, channel: Option<u64>, message: &str) -> Result<()>;

    /// Implementation name for logging
    fn name(&self) -> &'static str;
}

/// Default notifier that only writes to the log
///
/// Useful for headless deployments and as the fallback when no chat SDK
/// integration is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, session: SessionId, channel: Option<u64>, message: &str) -> Result<()> {
        info!(%session, ?channel, message, "notification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert!(
            notifier
                .send(SessionId::new(1), Some(42), "hello")
                .await
                .is_ok()
        );
        assert!(notifier.send(SessionId::new(1), None, "hello").await.is_ok());
        assert_eq!(notifier.name(), "log");
    }
}
