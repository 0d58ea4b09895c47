//! Core types for guild-jukebox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Unique identifier for a voice session (one per guild/server)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new SessionId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl PartialEq<u64> for SessionId {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<SessionId> for u64 {
    fn eq(&self, other: &SessionId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Global deduplication key for a piece of content
///
/// Derived from the normalized content reference, so two requests for the same
/// source resolve to the same key no matter which session they came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive the key for a content reference (sha256 of the trimmed reference)
    pub fn from_ref(content_ref: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content_ref.trim().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single playback request
///
/// Tracks are value types: queue entries, the now-playing slot, and loop
/// re-queues are all independent clones, never shared references.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// Source reference (URL or search string) the track was requested with
    pub content_ref: String,

    /// Display title (enriched from fetch metadata once available)
    pub title: String,

    /// Who asked for it
    pub requester: String,

    /// When the request was accepted
    pub queued_at: DateTime<Utc>,

    /// Duration in seconds, if the source reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,

    /// Local media file, present once the fetch has completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file: Option<PathBuf>,
}

impl Track {
    /// Create a track for a fresh request. The title starts as the raw
    /// reference and is replaced with real metadata after the fetch.
    pub fn new(content_ref: impl Into<String>, requester: impl Into<String>) -> Self {
        let content_ref = content_ref.into();
        Self {
            title: content_ref.clone(),
            content_ref,
            requester: requester.into(),
            queued_at: Utc::now(),
            duration_secs: None,
            local_file: None,
        }
    }

    /// Deduplication key for this track's content
    pub fn content_key(&self) -> ContentKey {
        ContentKey::from_ref(&self.content_ref)
    }
}

/// State of a content fetch in the shared registry
///
/// Absence from the registry means the content has never been fetched (or its
/// entry was garbage-collected). Completed and Failed are terminal until an
/// explicit cleanup pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    /// A fetch is in flight somewhere in the process
    Downloading,
    /// The media file is on disk
    Completed,
    /// The fetch failed; retried only after cleanup
    Failed,
}

/// Result of a successful media fetch
#[derive(Clone, Debug)]
pub struct FetchedMedia {
    /// Title reported by the source
    pub title: String,

    /// Path of the produced media file
    pub local_file: PathBuf,

    /// Duration in seconds, if the source reported one
    pub duration_secs: Option<u64>,
}

/// How a playback request was admitted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Something is already playing; the track joined the queue
    Queued {
        /// 1-based queue position of the new entry
        position: usize,
    },

    /// Another request is still starting up; this one entered the race
    Racing,

    /// The session was idle; this request starts playback
    Starting,
}

/// Event emitted during the playback lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Track added to a session queue
    TrackQueued {
        /// Session the track was queued in
        session: SessionId,
        /// Track title (raw reference until fetched)
        title: String,
        /// 1-based queue position
        position: usize,
    },

    /// Track entered a startup race against other concurrent requests
    TrackRacing {
        /// Session being raced for
        session: SessionId,
        /// Track title
        title: String,
    },

    /// Engine started playing a track
    PlaybackStarted {
        /// Session that started playing
        session: SessionId,
        /// Track title
        title: String,
    },

    /// A play attempt ended (naturally, skipped, or with an engine error)
    PlaybackFinished {
        /// Session the track finished in
        session: SessionId,
        /// Track title
        title: String,
        /// Engine-reported error, if the attempt did not end cleanly
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A play attempt could not be started
    PlaybackFailed {
        /// Session the failure occurred in
        session: SessionId,
        /// Track title
        title: String,
        /// What went wrong
        error: String,
    },

    /// A content fetch failed
    FetchFailed {
        /// Session the fetch belonged to
        session: SessionId,
        /// The content reference that could not be fetched
        content_ref: String,
        /// What went wrong
        error: String,
    },

    /// Loop mode toggled for a session
    LoopChanged {
        /// Session whose loop mode changed
        session: SessionId,
        /// New loop state
        enabled: bool,
    },

    /// Queue cleared without stopping playback
    QueueCleared {
        /// Session whose queue was cleared
        session: SessionId,
    },

    /// Current track skipped
    Skipped {
        /// Session the skip happened in
        session: SessionId,
    },

    /// Playback stopped and the session torn down
    Stopped {
        /// Session that was stopped
        session: SessionId,
    },

    /// Session disconnected after the idle timeout expired
    IdleDisconnected {
        /// Session that was reclaimed
        session: SessionId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

/// Snapshot of a session's playback state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStats {
    /// Number of tracks waiting in the queue
    pub queue_len: usize,

    /// Title of the current track, if any
    pub now_playing: Option<String>,

    /// Whether loop mode is on
    pub loop_enabled: bool,

    /// Whether the engine reports the session as paused
    pub paused: bool,

    /// Requests buffered while playback is still starting
    pub pending_requests: usize,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // --- SessionId conversions ---

    #[test]
    fn session_id_from_u64_and_back() {
        let id = SessionId::from(42_u64);
        let raw: u64 = id.into();
        assert_eq!(
            raw, 42,
            "round-trip through From<u64>/Into<u64> must preserve value"
        );
    }

    #[test]
    fn session_id_from_str_parses_valid_integer() {
        let id = SessionId::from_str("123456789012345678").unwrap();
        assert_eq!(id.get(), 123456789012345678);
    }

    #[test]
    fn session_id_from_str_rejects_non_numeric() {
        assert!(
            SessionId::from_str("abc").is_err(),
            "non-numeric string must fail to parse"
        );
    }

    #[test]
    fn session_id_from_str_rejects_negative() {
        assert!(
            SessionId::from_str("-7").is_err(),
            "SessionId wraps u64 and must reject negatives"
        );
    }

    #[test]
    fn session_id_display_matches_inner_value() {
        let id = SessionId::new(999);
        assert_eq!(id.to_string(), "999");
    }

    #[test]
    fn session_id_partial_eq_with_u64() {
        let id = SessionId::new(10);
        assert!(id == 10_u64, "SessionId should equal matching u64");
        assert!(
            10_u64 == id,
            "u64 should equal matching SessionId (symmetric)"
        );
        assert!(id != 11_u64, "SessionId should not equal different u64");
    }

    // --- ContentKey derivation ---

    #[test]
    fn content_key_is_stable_for_same_reference() {
        let a = ContentKey::from_ref("https://example.com/watch?v=abc123");
        let b = ContentKey::from_ref("https://example.com/watch?v=abc123");
        assert_eq!(a, b, "identical references must produce identical keys");
    }

    #[test]
    fn content_key_differs_for_different_references() {
        let a = ContentKey::from_ref("https://example.com/watch?v=abc123");
        let b = ContentKey::from_ref("https://example.com/watch?v=xyz789");
        assert_ne!(a, b, "different references must not collide");
    }

    #[test]
    fn content_key_ignores_surrounding_whitespace() {
        let a = ContentKey::from_ref("  https://example.com/watch?v=abc123  ");
        let b = ContentKey::from_ref("https://example.com/watch?v=abc123");
        assert_eq!(
            a, b,
            "whitespace padding must not produce a distinct cache entry"
        );
    }

    #[test]
    fn content_key_is_hex_sha256() {
        let key = ContentKey::from_ref("anything");
        assert_eq!(key.as_str().len(), 64, "sha256 hex digest is 64 chars");
        assert!(
            key.as_str().chars().all(|c| c.is_ascii_hexdigit()),
            "digest must be lowercase hex"
        );
    }

    // --- Track semantics ---

    #[test]
    fn track_clone_is_independent_value_copy() {
        let mut original = Track::new("https://example.com/a", "alice");
        let copy = original.clone();

        original.title = "mutated".into();
        original.local_file = Some(PathBuf::from("/tmp/a.mp3"));

        assert_eq!(
            copy.title, "https://example.com/a",
            "clone must not observe mutations of the original"
        );
        assert!(copy.local_file.is_none());
    }

    #[test]
    fn track_title_defaults_to_content_ref() {
        let track = Track::new("never gonna give you up", "bob");
        assert_eq!(
            track.title, track.content_ref,
            "title falls back to the raw reference until fetch metadata arrives"
        );
    }

    #[test]
    fn tracks_with_same_reference_share_a_content_key() {
        let a = Track::new("https://example.com/a", "alice");
        let b = Track::new("https://example.com/a", "bob");
        assert_eq!(
            a.content_key(),
            b.content_key(),
            "dedup key depends on the content, not the requester"
        );
    }

    // --- Serialization shapes ---

    #[test]
    fn fetch_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FetchState::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!(
            serde_json::to_string(&FetchState::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&FetchState::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn request_outcome_queued_carries_position() {
        let json = serde_json::to_value(RequestOutcome::Queued { position: 3 }).unwrap();
        assert_eq!(json["outcome"], "queued");
        assert_eq!(json["position"], 3);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::PlaybackStarted {
            session: SessionId::new(7),
            title: "song".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "playback_started");
        assert_eq!(json["session"], 7);
        assert_eq!(json["title"], "song");
    }

    #[test]
    fn playback_finished_omits_error_when_clean() {
        let event = Event::PlaybackFinished {
            session: SessionId::new(1),
            title: "song".into(),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(
            json.get("error").is_none(),
            "clean finishes should not serialize an error field"
        );
    }
}
