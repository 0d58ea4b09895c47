//! User controls: skip, stop, pause, loop, queue inspection, and shutdown.

use crate::error::{Error, PlaybackError, Result};
use crate::types::{Event, SessionId, SessionStats, Track};
use tracing::{debug, info, warn};

use super::Jukebox;

impl Jukebox {
    /// Skip the current track
    ///
    /// Always disables loop mode first, otherwise the skip would replay the
    /// very track being skipped. The engine stop fires the completion
    /// channel, so advancing to the next track happens through the normal
    /// finish path.
    pub async fn skip(&self, session_id: SessionId) -> Result<()> {
        if let Some(handle) = self.sessions.get(session_id).await {
            let mut state = handle.state.lock().await;
            if state.loop_enabled {
                state.loop_enabled = false;
                let current_file = state.now_playing.as_ref().and_then(|t| t.local_file.clone());
                drop(state);
                if let Some(path) = current_file {
                    self.files.unprotect(&path).await;
                }
                self.emit_event(Event::LoopChanged {
                    session: session_id,
                    enabled: false,
                });
            }
        }

        if !self.playback.stop(session_id) {
            return Err(Error::Playback(PlaybackError::NothingPlaying {
                session: session_id,
            }));
        }

        info!(%session_id, "track skipped");
        self.emit_event(Event::Skipped {
            session: session_id,
        });
        Ok(())
    }

    /// Stop playback and tear the session down entirely
    ///
    /// Clears the queue and all buffered requests, stops the engine, leaves
    /// the voice channel, and releases the session's files and fetch
    /// entries. Safe to call on a session that is not playing.
    pub async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.idle.cancel(session_id).await;

        if let Some(handle) = self.sessions.get(session_id).await {
            let mut state = handle.state.lock().await;
            let dropped = state.queue.len() + state.pending_requests.len();
            state.queue.clear();
            state.pending_requests.clear();
            state.now_playing = None;
            state.starting_playback = false;
            state.loop_enabled = false;
            if dropped > 0 {
                debug!(%session_id, dropped, "dropped queued tracks on stop");
            }
        }

        self.playback.stop(session_id);
        if let Err(e) = self.playback.disconnect(session_id).await {
            warn!(%session_id, error = %e, "disconnect failed during stop");
        }
        self.teardown_session(session_id).await;
        // The engine stop fires the completion watcher, which may have armed
        // the idle timer for the now-removed session
        self.idle.cancel(session_id).await;

        info!(%session_id, "session stopped");
        self.emit_event(Event::Stopped {
            session: session_id,
        });
        Ok(())
    }

    /// Pause the current track. Returns whether anything was paused.
    pub fn pause(&self, session_id: SessionId) -> bool {
        self.playback.pause(session_id)
    }

    /// Resume a paused track. Returns whether anything was resumed.
    pub fn resume(&self, session_id: SessionId) -> bool {
        self.playback.resume(session_id)
    }

    /// Set loop mode for a session
    ///
    /// Turning loop on protects the current track's file so post-playback
    /// cleanup cannot delete it; turning it off releases that protection.
    /// Setting the mode it already has is a no-op.
    pub async fn set_loop(&self, session_id: SessionId, enabled: bool) -> Result<()> {
        let handle = self.sessions.session(session_id).await;
        let mut state = handle.state.lock().await;

        if state.loop_enabled == enabled {
            return Ok(());
        }
        state.loop_enabled = enabled;
        let current_file = state.now_playing.as_ref().and_then(|t| t.local_file.clone());
        drop(state);

        if let Some(path) = current_file {
            if enabled {
                self.files.protect(&path).await;
            } else {
                self.files.unprotect(&path).await;
            }
        }

        info!(%session_id, enabled, "loop mode changed");
        self.emit_event(Event::LoopChanged {
            session: session_id,
            enabled,
        });
        Ok(())
    }

    /// Flip loop mode. Returns the new state.
    pub async fn toggle_loop(&self, session_id: SessionId) -> Result<bool> {
        let enabled = match self.sessions.get(session_id).await {
            Some(handle) => !handle.state.lock().await.loop_enabled,
            None => true,
        };
        self.set_loop(session_id, enabled).await?;
        Ok(enabled)
    }

    /// Clones of the session's queued tracks, in play order
    pub async fn queue_snapshot(&self, session_id: SessionId) -> Vec<Track> {
        match self.sessions.get(session_id).await {
            Some(handle) => handle.state.lock().await.queue.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The track currently playing, if any
    pub async fn now_playing(&self, session_id: SessionId) -> Option<Track> {
        let handle = self.sessions.get(session_id).await?;
        let state = handle.state.lock().await;
        state.now_playing.clone()
    }

    /// Drop every queued track without touching the current one
    ///
    /// Returns how many tracks were dropped.
    pub async fn clear_queue(&self, session_id: SessionId) -> usize {
        let Some(handle) = self.sessions.get(session_id).await else {
            return 0;
        };
        let cleared = {
            let mut state = handle.state.lock().await;
            let cleared = state.queue.len();
            state.queue.clear();
            cleared
        };

        info!(%session_id, cleared, "queue cleared");
        self.emit_event(Event::QueueCleared {
            session: session_id,
        });
        cleared
    }

    /// Snapshot of a session's playback state
    pub async fn session_stats(&self, session_id: SessionId) -> Result<SessionStats> {
        let handle = self
            .sessions
            .get(session_id)
            .await
            .ok_or(Error::SessionNotFound(session_id))?;
        let state = handle.state.lock().await;
        Ok(SessionStats {
            queue_len: state.queue.len(),
            now_playing: state.now_playing.as_ref().map(|t| t.title.clone()),
            loop_enabled: state.loop_enabled,
            paused: self.playback.is_paused(session_id),
            pending_requests: state.pending_requests.len(),
        })
    }

    /// Bind a chat channel to the session for notifications
    pub async fn set_notify_channel(&self, session_id: SessionId, channel: u64) {
        let handle = self.sessions.session(session_id).await;
        handle.state.lock().await.notify_channel = Some(channel);
    }

    /// Reclaim a session the platform dropped (e.g. the bot left the guild)
    ///
    /// Like [`stop`](Self::stop) but silent: the channel is gone, so no
    /// notification or stop event is produced.
    pub async fn remove_session(&self, session_id: SessionId) {
        self.idle.cancel(session_id).await;
        if let Some(handle) = self.sessions.get(session_id).await {
            let mut state = handle.state.lock().await;
            state.queue.clear();
            state.pending_requests.clear();
            state.now_playing = None;
            state.starting_playback = false;
        }
        self.playback.stop(session_id);
        if let Err(e) = self.playback.disconnect(session_id).await {
            debug!(%session_id, error = %e, "disconnect failed while removing session");
        }
        self.teardown_session(session_id).await;
        self.idle.cancel(session_id).await;
        info!(%session_id, "session removed");
    }

    /// Shut down gracefully
    ///
    /// Stops admitting requests, stops and tears down every session, then
    /// gives the deletion worker a bounded window to drain before the
    /// pending list is swept one last time.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        for session_id in self.sessions.ids().await {
            if let Err(e) = self.stop(session_id).await {
                warn!(%session_id, error = %e, "stop failed during shutdown");
            }
        }
        self.idle.cancel_all().await;

        let drained = tokio::time::timeout(
            self.config.playback.finish_wait,
            self.files.wait_for_drain(),
        )
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.files.queue_len().await,
                "deletion worker did not drain before the shutdown deadline"
            );
        }
        self.files.sweep_pending().await;

        self.emit_event(Event::Shutdown);
    }
}
