//! Per-session playback state
//!
//! Each session owns a single mutex guarding all of its queue and playback
//! bookkeeping. Admission decisions, race resolution, and completion handling
//! all run under that one lock, which is what serializes concurrent requests
//! against each other.

use crate::types::{SessionId, Track};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutable per-session state, always accessed through [`SessionHandle`]
#[derive(Debug, Default)]
pub struct SessionState {
    /// FIFO of tracks waiting to play
    pub queue: VecDeque<Track>,

    /// The track currently playing (or being started)
    pub now_playing: Option<Track>,

    /// When on, the finished track is replayed instead of dequeuing
    pub loop_enabled: bool,

    /// True between "first request admitted" and "engine actually playing".
    /// Requests arriving in that window enter the startup race.
    pub starting_playback: bool,

    /// Requests buffered during startup; the race winner drains these into
    /// the queue
    pub pending_requests: Vec<Track>,

    /// Chat channel bound to this session for notifications
    pub notify_channel: Option<u64>,
}

impl SessionState {
    /// Pick the track to play next
    ///
    /// With loop on and something playing, returns an independent clone of
    /// the current track and leaves the queue untouched. Otherwise pops the
    /// FIFO head. Calling this repeatedly with loop on yields the same track
    /// every time.
    pub fn dequeue_next(&mut self) -> Option<Track> {
        if self.loop_enabled
            && let Some(current) = &self.now_playing
        {
            return Some(current.clone());
        }
        self.queue.pop_front()
    }

    /// Move buffered race requests into the queue in arrival order
    ///
    /// A buffered winner passes its own track as `except` so it is not queued
    /// twice. Exclusion is by content reference and skips at most one entry;
    /// a duplicate request for the same content stays queued. Returns how
    /// many tracks moved.
    pub fn move_pending_to_queue(&mut self, except: Option<&Track>) -> usize {
        let pending = std::mem::take(&mut self.pending_requests);
        let mut excluded = false;
        let mut moved = 0;
        for track in pending {
            let is_winner = !excluded
                && except
                    .map(|winner| winner.content_ref == track.content_ref)
                    .unwrap_or(false);
            if is_winner {
                excluded = true;
            } else {
                self.queue.push_back(track);
                moved += 1;
            }
        }
        moved
    }

    /// Withdraw one buffered entry matching the track's content reference
    ///
    /// Returns whether an entry was removed. A race loser uses this to tell
    /// whether its own entry is still buffered or was already drained into
    /// the queue by the winner.
    pub fn remove_pending(&mut self, track: &Track) -> bool {
        match self
            .pending_requests
            .iter()
            .position(|pending| pending.content_ref == track.content_ref)
        {
            Some(index) => {
                self.pending_requests.remove(index);
                true
            }
            None => false,
        }
    }

    /// Clones of the next `n` queued tracks, for preloading
    pub fn upcoming(&self, n: usize) -> Vec<Track> {
        self.queue.iter().take(n).cloned().collect()
    }
}

/// Shared handle to one session's state
#[derive(Debug, Default)]
pub struct SessionHandle {
    /// The per-session lock; held across entire admission decisions
    pub state: Mutex<SessionState>,
}

/// Registry of all live sessions
///
/// Sessions are created lazily on first use and removed on stop, idle
/// disconnect, or when the platform drops the guild.
#[derive(Clone, Default)]
pub struct SessionQueue {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionHandle>>>>,
}

impl SessionQueue {
    /// Create an empty session registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for a session, creating blank state on first use
    pub async fn session(&self, id: SessionId) -> Arc<SessionHandle> {
        self.sessions
            .lock()
            .await
            .entry(id)
            .or_default()
            .clone()
    }

    /// Get the handle for a session only if it already exists
    pub async fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    /// Drop a session's state entirely
    pub async fn remove(&self, id: SessionId) {
        self.sessions.lock().await.remove(&id);
    }

    /// IDs of all live sessions
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().copied().collect()
    }
}
