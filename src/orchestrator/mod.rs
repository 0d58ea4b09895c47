//! Core orchestrator implementation split into focused submodules.
//!
//! The `Jukebox` struct and its methods are organized by domain:
//! - `request` - Request admission and the startup race
//! - `playback` - Fetch-and-play, completion handling, idle teardown
//! - `control` - User controls (skip/stop/pause/loop/queue) and shutdown

mod control;
mod playback;
mod request;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::engine::{PlaybackEngine, VoiceEngine};
use crate::error::{Error, Result};
use crate::fetch::MediaFetcher;
use crate::files::FileLifecycleManager;
use crate::idle::IdleTimeoutManager;
use crate::notify::Notifier;
use crate::registry::DownloadRegistry;
use crate::session::SessionQueue;
use crate::types::Event;

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped or
/// internally shared)
///
/// One `Jukebox` serves every session. Clones share all state; background
/// workers hold clones of the whole orchestrator.
#[derive(Clone)]
pub struct Jukebox {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Per-session playback state
    pub(crate) sessions: SessionQueue,
    /// Global single-flight fetch table
    pub(crate) registry: DownloadRegistry,
    /// Voice engine wrapper
    pub(crate) playback: PlaybackEngine,
    /// Per-session idle timers
    pub(crate) idle: IdleTimeoutManager,
    /// Media file protection and deletion
    pub(crate) files: FileLifecycleManager,
    /// Best-effort user notifications
    pub(crate) notifier: std::sync::Arc<dyn Notifier>,
    /// Flag cleared during shutdown so no new requests are admitted
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Jukebox {
    /// Create an orchestrator with the given collaborators
    ///
    /// Creates the download and temp directories, sweeps the persisted
    /// pending-deletion list, and purges stale media left over from earlier
    /// runs.
    pub async fn new(
        config: Config,
        fetcher: std::sync::Arc<dyn MediaFetcher>,
        engine: std::sync::Arc<dyn VoiceEngine>,
        notifier: std::sync::Arc<dyn Notifier>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| Error::Config {
                message: format!(
                    "could not create download directory {}: {e}",
                    config.download_dir().display()
                ),
                key: Some("fetch.download_dir".to_string()),
            })?;

        let files = FileLifecycleManager::new(&config);
        let swept = files.sweep_pending().await;
        if swept > 0 {
            tracing::info!(swept, "swept pending deletions from previous run");
        }
        let purged = files.purge_stale(config.cleanup.stale_after).await;
        if purged > 0 {
            tracing::info!(purged, "purged stale media from previous run");
        }

        let registry = DownloadRegistry::new(fetcher, &config.fetch);
        let playback = PlaybackEngine::new(engine, files.clone(), &config.playback);
        let idle = IdleTimeoutManager::new(config.idle.timeout);
        let (event_tx, _) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            config: std::sync::Arc::new(config),
            event_tx,
            sessions: SessionQueue::new(),
            registry,
            playback,
            idle,
            files,
            notifier,
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        })
    }

    /// Subscribe to playback lifecycle events
    ///
    /// Returns a broadcast receiver. Slow subscribers may miss events; the
    /// channel buffers 1000 entries.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Best-effort notification; failures are logged, never propagated
    pub(crate) async fn notify(&self, session: crate::types::SessionId, message: &str) {
        let channel = match self.sessions.get(session).await {
            Some(handle) => handle.state.lock().await.notify_channel,
            None => None,
        };
        if let Err(e) = self.notifier.send(session, channel, message).await {
            tracing::warn!(%session, error = %e, "notification failed");
        }
    }
}
