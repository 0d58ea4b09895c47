//! Voice engine integration
//!
//! The chat platform's voice stack is injected as a [`VoiceEngine`] trait
//! object. Every play attempt carries a oneshot sender the engine fires
//! exactly once when the attempt ends, which is how completion reaches the
//! orchestrator without any engine-thread callback marshaling.

use crate::config::PlaybackConfig;
use crate::error::{Error, PlaybackError, Result};
use crate::files::FileLifecycleManager;
use crate::types::{SessionId, Track};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

/// Abstraction over the platform voice stack
///
/// `play` must send exactly one value on `done` when the attempt ends:
/// `None` for a clean finish (including stop/skip), `Some(reason)` for a
/// mid-play failure. Dropping the sender without sending is treated as an
/// engine fault by the receiver.
#[async_trait]
pub trait VoiceEngine: Send + Sync {
    /// Join the session's voice channel (idempotent)
    async fn connect(&self, session: SessionId) -> Result<()>;

    /// Leave the session's voice channel
    async fn disconnect(&self, session: SessionId) -> Result<()>;

    /// Start playing a local media file
    async fn play(
        &self,
        session: SessionId,
        source: &Path,
        volume: f32,
        done: oneshot::Sender<Option<String>>,
    ) -> Result<()>;

    /// Stop the current source. Returns whether anything was stopped.
    fn stop(&self, session: SessionId) -> bool;

    /// Pause the current source. Returns whether anything was paused.
    fn pause(&self, session: SessionId) -> bool;

    /// Resume a paused source. Returns whether anything was resumed.
    fn resume(&self, session: SessionId) -> bool;

    /// Whether the session is actively playing (not paused)
    fn is_playing(&self, session: SessionId) -> bool;

    /// Whether the session is paused mid-track
    fn is_paused(&self, session: SessionId) -> bool;

    /// Implementation name for logging
    fn name(&self) -> &'static str;
}

/// Handle to one play attempt; resolves when the attempt ends
pub struct PlaybackHandle {
    session: SessionId,
    finished: oneshot::Receiver<Option<String>>,
}

impl PlaybackHandle {
    /// Wait for the attempt to end. Returns the engine-reported error, if
    /// any. A dropped channel is reported as an error rather than a clean
    /// finish, so a crashing engine cannot masquerade as end-of-track.
    pub async fn finished(self) -> Option<String> {
        match self.finished.await {
            Ok(outcome) => outcome,
            Err(_) => Some("engine dropped the completion channel".to_string()),
        }
    }

    /// Session this attempt belongs to
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Engine wrapper enforcing playback invariants
///
/// Adds the double-play guard, loop-mode file protection, and active-file
/// tracking on top of the raw [`VoiceEngine`].
#[derive(Clone)]
pub struct PlaybackEngine {
    engine: Arc<dyn VoiceEngine>,
    files: FileLifecycleManager,
    active: Arc<Mutex<HashMap<SessionId, PathBuf>>>,
    volume: f32,
}

impl PlaybackEngine {
    /// Wrap a voice engine
    pub fn new(
        engine: Arc<dyn VoiceEngine>,
        files: FileLifecycleManager,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            engine,
            files,
            active: Arc::new(Mutex::new(HashMap::new())),
            volume: config.volume,
        }
    }

    /// Start playing a fetched track
    ///
    /// Rejects when the engine already reports the session as playing (the
    /// idempotent double-play guard). With loop on, the backing file is
    /// protected before the engine touches it so the post-playback cleanup
    /// cannot delete a file the loop is about to replay.
    pub async fn play(
        &self,
        session: SessionId,
        track: &Track,
        loop_enabled: bool,
    ) -> Result<PlaybackHandle> {
        if self.engine.is_playing(session) {
            return Err(Error::Playback(PlaybackError::AlreadyPlaying { session }));
        }

        let source = track.local_file.as_ref().ok_or_else(|| {
            Error::Playback(PlaybackError::NoLocalFile {
                title: track.title.clone(),
            })
        })?;
        if tokio::fs::metadata(source).await.is_err() {
            return Err(Error::Playback(PlaybackError::SourceMissing {
                path: source.clone(),
            }));
        }

        if loop_enabled {
            self.files.protect(source).await;
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.engine
            .play(session, source, self.volume, done_tx)
            .await?;
        self.active.lock().await.insert(session, source.clone());

        debug!(%session, title = %track.title, "playback started");
        Ok(PlaybackHandle {
            session,
            finished: done_rx,
        })
    }

    /// Remove and return the session's active file record
    pub async fn take_active(&self, session: SessionId) -> Option<PathBuf> {
        self.active.lock().await.remove(&session)
    }

    /// Join the session's voice channel
    pub async fn connect(&self, session: SessionId) -> Result<()> {
        self.engine.connect(session).await
    }

    /// Leave the session's voice channel
    pub async fn disconnect(&self, session: SessionId) -> Result<()> {
        self.engine.disconnect(session).await
    }

    /// Stop the current source
    pub fn stop(&self, session: SessionId) -> bool {
        self.engine.stop(session)
    }

    /// Pause the current source
    pub fn pause(&self, session: SessionId) -> bool {
        self.engine.pause(session)
    }

    /// Resume a paused source
    pub fn resume(&self, session: SessionId) -> bool {
        self.engine.resume(session)
    }

    /// Whether the session is actively playing
    pub fn is_playing(&self, session: SessionId) -> bool {
        self.engine.is_playing(session)
    }

    /// Whether the session is paused
    pub fn is_paused(&self, session: SessionId) -> bool {
        self.engine.is_paused(session)
    }
}
