//! Fetch-and-play, completion handling, and idle teardown.
//!
//! `advance_to` is the single path through which every track starts playing,
//! whether it came from a startup race, the queue, or loop mode. Completion
//! arrives on a per-attempt channel and is handled by a watcher task so the
//! engine never calls back into the orchestrator directly.

use crate::types::{Event, SessionId, Track};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

use super::Jukebox;

impl Jukebox {
    /// Start playing `first`, advancing past start failures
    ///
    /// Fetches the track if its file is not already on disk, marks it as now
    /// playing, preloads the next few queue entries, and hands the file to
    /// the engine. If the fetch or the engine rejects the track and
    /// `retry_allowed` is set, one attempt is made with the next queued
    /// track; a second failure gives up and lets the session go idle.
    ///
    /// Boxed because the completion watcher awaits back into this function;
    /// an opaque future type here would be infinitely recursive.
    pub(crate) fn advance_to(
        &self,
        session_id: SessionId,
        first: Track,
        retry_allowed: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut retry_allowed = retry_allowed;
            let mut current = Some(first);

            while let Some(mut track) = current.take() {
                let on_disk = match &track.local_file {
                    Some(path) => tokio::fs::metadata(path).await.is_ok(),
                    None => false,
                };
                if !on_disk {
                    match self.registry.fetch(session_id, &track.content_ref).await {
                        Ok(media) => {
                            track.local_file = Some(media.local_file);
                            if !media.title.is_empty() {
                                track.title = media.title;
                            }
                            if track.duration_secs.is_none() {
                                track.duration_secs = media.duration_secs;
                            }
                        }
                        Err(e) => {
                            warn!(%session_id, content_ref = %track.content_ref, error = %e, "fetch failed while advancing");
                            self.emit_event(Event::FetchFailed {
                                session: session_id,
                                content_ref: track.content_ref.clone(),
                                error: e.to_string(),
                            });
                            self.notify(
                                session_id,
                                &format!("Could not fetch \"{}\": {e}", track.title),
                            )
                            .await;

                            current = self.retry_forward(session_id, &track, &mut retry_allowed).await;
                            continue;
                        }
                    }
                }

                // A stop during the fetch removed the session; the result is
                // discarded rather than resurrected
                let Some(handle) = self.sessions.get(session_id).await else {
                    debug!(%session_id, title = %track.title, "session gone, discarding track");
                    return;
                };
                let (loop_enabled, upcoming) = {
                    let mut state = handle.state.lock().await;
                    state.now_playing = Some(track.clone());
                    state.starting_playback = false;
                    (state.loop_enabled, state.upcoming(self.config.fetch.max_preload))
                };
                self.registry.preload(session_id, &upcoming).await;

                let started = match self.playback.connect(session_id).await {
                    Ok(()) => self.playback.play(session_id, &track, loop_enabled).await,
                    Err(e) => Err(e),
                };

                match started {
                    Ok(play_handle) => {
                        info!(%session_id, title = %track.title, "now playing");
                        self.emit_event(Event::PlaybackStarted {
                            session: session_id,
                            title: track.title.clone(),
                        });
                        self.notify(session_id, &format!("Now playing: {}", track.title))
                            .await;

                        let jukebox = self.clone();
                        tokio::spawn(async move {
                            let error = play_handle.finished().await;
                            jukebox.handle_playback_finished(session_id, error).await;
                        });
                        return;
                    }
                    Err(e) => {
                        warn!(%session_id, title = %track.title, error = %e, "playback start failed");
                        self.emit_event(Event::PlaybackFailed {
                            session: session_id,
                            title: track.title.clone(),
                            error: e.to_string(),
                        });
                        self.notify(
                            session_id,
                            &format!("Could not play \"{}\": {e}", track.title),
                        )
                        .await;

                        if let Some(path) = &track.local_file {
                            self.files.unprotect(path).await;
                            self.files.delete(path, session_id, false).await;
                        }

                        current = self.retry_forward(session_id, &track, &mut retry_allowed).await;
                    }
                }
            }

            self.schedule_idle(session_id).await;
        })
    }

    /// Consume the retry budget and pop the next queued track
    ///
    /// Always pops the FIFO head, never the loop replay: a track that just
    /// failed must not be handed back to the engine. Clears the failed
    /// track's claim on `now_playing` and claims the replacement under the
    /// same lock.
    async fn retry_forward(
        &self,
        session_id: SessionId,
        failed: &Track,
        retry_allowed: &mut bool,
    ) -> Option<Track> {
        let Some(handle) = self.sessions.get(session_id).await else {
            return None;
        };
        let mut state = handle.state.lock().await;

        if state
            .now_playing
            .as_ref()
            .is_some_and(|t| t.content_ref == failed.content_ref)
        {
            state.now_playing = None;
        }

        if *retry_allowed {
            *retry_allowed = false;
            if let Some(next) = state.queue.pop_front() {
                state.now_playing = Some(next.clone());
                state.starting_playback = true;
                debug!(%session_id, title = %next.title, "advancing past failed track");
                return Some(next);
            }
        }

        state.starting_playback = false;
        None
    }

    /// React to the end of a play attempt
    ///
    /// Runs on the watcher task once the engine resolves the completion
    /// channel. Picks the next track (the loop replay or the queue head),
    /// releases the finished file unless loop mode holds it, and either
    /// advances or arms the idle timer.
    pub(crate) async fn handle_playback_finished(
        &self,
        session_id: SessionId,
        error: Option<String>,
    ) {
        // A stop can tear the session down before the watcher fires
        let Some(handle) = self.sessions.get(session_id).await else {
            debug!(%session_id, "playback finished for a removed session");
            return;
        };

        let (finished, next, loop_enabled) = {
            let mut state = handle.state.lock().await;
            // Order matters: the loop replay reads now_playing
            let next = state.dequeue_next();
            let finished = state.now_playing.take();
            if let Some(next) = &next {
                // Claim the advance before the lock drops so concurrent
                // requests race instead of starting a second playback
                state.now_playing = Some(next.clone());
                state.starting_playback = true;
            }
            (finished, next, state.loop_enabled)
        };

        if let Some(finished) = &finished {
            debug!(%session_id, title = %finished.title, error = ?error, "playback finished");
            self.emit_event(Event::PlaybackFinished {
                session: session_id,
                title: finished.title.clone(),
                error: error.clone(),
            });
            if let Some(error) = &error {
                self.notify(
                    session_id,
                    &format!("Playback of \"{}\" ended with an error: {error}", finished.title),
                )
                .await;
            }
        }

        if let Some(path) = self.playback.take_active(session_id).await
            && !loop_enabled
        {
            self.files.delete(&path, session_id, false).await;
        }

        match next {
            Some(next) => self.advance_to(session_id, next, true).await,
            None => self.schedule_idle(session_id).await,
        }
    }

    /// Arm the idle timer for a session that has nothing left to play
    pub(crate) async fn schedule_idle(&self, session_id: SessionId) {
        let jukebox = self.clone();
        self.idle
            .schedule(session_id, move || async move {
                jukebox.idle_expired(session_id).await;
            })
            .await;
    }

    /// Timer expiry: re-check idleness, then disconnect and reclaim
    ///
    /// A request can land during the final stretch of the wait, so expiry
    /// alone proves nothing. Only a session that is still fully idle is torn
    /// down.
    async fn idle_expired(&self, session_id: SessionId) {
        if self.playback.is_playing(session_id) || self.playback.is_paused(session_id) {
            debug!(%session_id, "idle timer expired but the engine is busy");
            return;
        }
        // A stop may have torn the session down while the timer was armed
        let Some(handle) = self.sessions.get(session_id).await else {
            return;
        };
        {
            let state = handle.state.lock().await;
            let idle = state.queue.is_empty()
                && state.now_playing.is_none()
                && !state.starting_playback;
            if !idle {
                debug!(%session_id, "idle timer expired but the session has work");
                return;
            }
        }

        info!(%session_id, "disconnecting idle session");
        self.notify(session_id, "Disconnected after inactivity").await;
        if let Err(e) = self.playback.disconnect(session_id).await {
            warn!(%session_id, error = %e, "disconnect failed during idle teardown");
        }
        self.teardown_session(session_id).await;
        self.emit_event(Event::IdleDisconnected {
            session: session_id,
        });
    }

    /// Release everything a session holds
    ///
    /// Deletes the active file (if any), drops the session's fetch entries,
    /// and removes its state.
    pub(crate) async fn teardown_session(&self, session_id: SessionId) {
        if let Some(path) = self.playback.take_active(session_id).await {
            self.files.unprotect(&path).await;
            self.files.delete(&path, session_id, false).await;
        }
        self.registry.cleanup(session_id).await;
        self.sessions.remove(session_id).await;
    }
}
