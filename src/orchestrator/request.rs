//! Request admission and the startup race.
//!
//! Admission runs entirely under the per-session lock: the state observed
//! there decides whether a request queues behind active playback, joins an
//! in-progress startup race, or starts playback itself. The slow work (the
//! fetch) always happens on a spawned worker after the lock is released.

use crate::types::{Event, RequestOutcome, SessionId, Track};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

use super::Jukebox;

impl Jukebox {
    /// Admit a playback request
    ///
    /// Exactly one of three things happens, decided atomically under the
    /// session lock:
    /// - something is already playing: the track joins the queue and nearby
    ///   entries are preloaded
    /// - playback is still starting: the track is buffered and races the
    ///   other startup requests with its own competitive fetch
    /// - the session is idle: this request claims the startup slot
    ///
    /// Any scheduled idle timer is cancelled before the decision.
    pub async fn request(&self, session_id: SessionId, track: Track) -> Result<RequestOutcome> {
        if !self
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        self.idle.cancel(session_id).await;

        let handle = self.sessions.session(session_id).await;
        let mut state = handle.state.lock().await;

        let engine_busy = self.playback.is_playing(session_id) || self.playback.is_paused(session_id);
        let playing = engine_busy || (state.now_playing.is_some() && !state.starting_playback);

        if playing {
            state.queue.push_back(track.clone());
            let position = state.queue.len();
            let upcoming = state.upcoming(self.config.fetch.max_preload);
            drop(state);

            info!(%session_id, title = %track.title, position, "track queued");
            self.registry.preload(session_id, &upcoming).await;
            self.emit_event(Event::TrackQueued {
                session: session_id,
                title: track.title.clone(),
                position,
            });
            return Ok(RequestOutcome::Queued { position });
        }

        if state.starting_playback {
            // Startup already claimed; buffer the track and race for it
            state.pending_requests.push(track.clone());
            drop(state);

            info!(%session_id, title = %track.title, "track racing for startup");
            self.spawn_fetch_and_resolve(session_id, track.clone(), true);
            self.emit_event(Event::TrackRacing {
                session: session_id,
                title: track.title,
            });
            return Ok(RequestOutcome::Racing);
        }

        // Idle session: this request claims the startup slot
        state.starting_playback = true;
        drop(state);

        info!(%session_id, title = %track.title, "starting playback");
        self.spawn_fetch_and_resolve(session_id, track, false);
        Ok(RequestOutcome::Starting)
    }

    /// Spawn a startup fetch worker for a track
    ///
    /// `buffered` records whether the track sits in the session's pending
    /// buffer (racers do, the original starter does not).
    pub(crate) fn spawn_fetch_and_resolve(&self, session_id: SessionId, track: Track, buffered: bool) {
        let jukebox = self.clone();
        tokio::spawn(async move {
            jukebox.fetch_and_resolve(session_id, track, buffered).await;
        });
    }

    /// Worker body: fetch the track, then resolve the startup race
    async fn fetch_and_resolve(&self, session_id: SessionId, mut track: Track, buffered: bool) {
        match self.registry.fetch(session_id, &track.content_ref).await {
            Ok(media) => {
                track.local_file = Some(media.local_file);
                if !media.title.is_empty() {
                    track.title = media.title;
                }
                if track.duration_secs.is_none() {
                    track.duration_secs = media.duration_secs;
                }
                self.resolve_race(session_id, track, buffered).await;
            }
            Err(e) => {
                warn!(%session_id, content_ref = %track.content_ref, error = %e, "startup fetch failed");
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
                self.resolve_fetch_failure(session_id, &track).await;
            }
        }
    }

    /// Resolve the startup race after a fetch completes
    ///
    /// Re-acquires the session lock and re-checks the world: the winner is
    /// whichever worker still finds the session starting with nothing
    /// playing. Which worker that is depends on lock acquisition order and
    /// is deliberately left unspecified. The winner claims `now_playing`
    /// before the lock drops, drains the buffered requests (excluding its
    /// own entry, if it had one) into the queue, and starts the engine.
    /// A loser whose entry is still buffered moves it to the queue itself;
    /// one the winner already drained does nothing.
    async fn resolve_race(&self, session_id: SessionId, track: Track, buffered: bool) {
        // A stop during the fetch discards the result entirely
        let Some(handle) = self.sessions.get(session_id).await else {
            debug!(%session_id, title = %track.title, "session gone, discarding startup fetch result");
            return;
        };
        let mut state = handle.state.lock().await;

        let won = state.starting_playback
            && state.now_playing.is_none()
            && !self.playback.is_playing(session_id);

        if won {
            // Claim the slot under the lock so every later worker observes
            // the decision; advance_to re-stores the same track
            state.now_playing = Some(track.clone());
            let moved = state.move_pending_to_queue(if buffered { Some(&track) } else { None });
            let upcoming = state.upcoming(self.config.fetch.max_preload);
            drop(state);

            if moved > 0 {
                debug!(%session_id, moved, "race winner drained pending requests into queue");
            }
            self.registry.preload(session_id, &upcoming).await;
            self.advance_to(session_id, track, true).await;
        } else {
            // Lost the race. If the winner already drained this entry into
            // the queue, enqueuing it here again would duplicate it.
            if buffered && !state.remove_pending(&track) {
                drop(state);
                debug!(%session_id, title = %track.title, "race lost, track already drained into queue");
                return;
            }
            state.queue.push_back(track.clone());
            let position = state.queue.len();
            drop(state);

            debug!(%session_id, title = %track.title, position, "race lost, track queued");
            self.emit_event(Event::TrackQueued {
                session: session_id,
                title: track.title,
                position,
            });
        }
    }

    /// Handle a failed startup fetch
    ///
    /// The failed track is withdrawn from the race. If other racers are
    /// still in flight the startup slot stays claimed for them; otherwise
    /// the session either advances to whatever is queued or goes idle.
    async fn resolve_fetch_failure(&self, session_id: SessionId, track: &Track) {
        let Some(handle) = self.sessions.get(session_id).await else {
            return;
        };
        let mut state = handle.state.lock().await;

        state
            .pending_requests
            .retain(|pending| pending.content_ref != track.content_ref);

        if !state.starting_playback || state.now_playing.is_some() {
            // Someone else already won; nothing to unwind
            return;
        }
        if !state.pending_requests.is_empty() {
            // Other racers may still win the startup slot
            return;
        }
        if self.registry.has_inflight(session_id).await {
            // The original starter's fetch is still running; it will resolve
            // the race itself
            return;
        }

        match state.queue.pop_front() {
            Some(next) => {
                // Claim the slot before the lock drops
                state.now_playing = Some(next.clone());
                drop(state);
                self.advance_to(session_id, next, false).await;
            }
            None => {
                state.starting_playback = false;
                drop(state);
                self.schedule_idle(session_id).await;
            }
        }
    }
}
