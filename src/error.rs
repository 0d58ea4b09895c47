//! Error types for guild-jukebox
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Fetch, Playback, File)
//! - Context information (session ID, content reference, file path)
//!
//! Race loss during concurrent startup is deliberately NOT an error: a losing
//! request is enqueued normally and reported through the event stream.

use crate::types::SessionId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for guild-jukebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for guild-jukebox
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Content fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// File lifecycle error
    #[error("file error: {0}")]
    File(#[from] FileError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session not found
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Content fetch errors (external tool invocation, waiter timeouts)
#[derive(Debug, Error)]
pub enum FetchError {
    /// The external fetch tool binary could not be located
    #[error("fetch tool not found: {0}")]
    ToolNotFound(String),

    /// The content reference is not a usable source
    #[error("invalid content reference: {reference}: {reason}")]
    InvalidReference {
        /// The offending reference
        reference: String,
        /// Why it was rejected
        reason: String,
    },

    /// The fetch tool ran but exited with an error
    #[error("fetch failed for {content_ref}: {reason}")]
    ToolFailed {
        /// The content reference being fetched
        content_ref: String,
        /// Tool stderr tail or exit status
        reason: String,
    },

    /// The tool reported success but no media file was produced
    #[error("fetch produced no media file for {content_ref}")]
    OutputMissing {
        /// The content reference being fetched
        content_ref: String,
    },

    /// A previous fetch of this content failed and has not been cleaned up
    #[error("fetch previously failed for {content_ref}: {reason}")]
    PreviouslyFailed {
        /// The content reference
        content_ref: String,
        /// The cached failure reason
        reason: String,
    },

    /// Waited on another session's in-flight fetch past the deadline
    #[error("timed out after {waited_secs}s waiting for in-flight fetch of {content_ref}")]
    WaitTimeout {
        /// The content reference being waited on
        content_ref: String,
        /// How long the waiter blocked before giving up
        waited_secs: u64,
    },
}

/// Playback errors (engine rejection, mid-play failure)
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The engine already reports this session as playing
    #[error("session {session} is already playing")]
    AlreadyPlaying {
        /// The session that rejected the double play
        session: SessionId,
    },

    /// Voice connection could not be established
    #[error("session {session} could not connect to voice: {reason}")]
    ConnectFailed {
        /// The session that failed to connect
        session: SessionId,
        /// Engine-reported reason
        reason: String,
    },

    /// The engine rejected or aborted the play attempt
    #[error("engine rejected playback for session {session}: {reason}")]
    EngineRejected {
        /// The session the attempt was for
        session: SessionId,
        /// Engine-reported reason
        reason: String,
    },

    /// The track has no fetched media file to play
    #[error("no local media file for track \"{title}\"")]
    NoLocalFile {
        /// Title of the track missing its file
        title: String,
    },

    /// The fetched media file disappeared before playback started
    #[error("media file missing at {path}")]
    SourceMissing {
        /// The path that should have held the media
        path: PathBuf,
    },

    /// Nothing is playing, so the control operation has no target
    #[error("nothing is playing in session {session}")]
    NothingPlaying {
        /// The session the control was aimed at
        session: SessionId,
    },
}

/// File lifecycle errors
///
/// These rarely surface to callers: deletion failures degrade to the
/// background deletion queue and are logged, not returned.
#[derive(Debug, Error)]
pub enum FileError {
    /// The file is held open by another process
    #[error("file locked: {path}: {reason}")]
    Locked {
        /// The file that could not be removed
        path: PathBuf,
        /// OS-reported reason
        reason: String,
    },

    /// All deletion attempts (including the temp-move fallback) failed
    #[error("failed to delete {path} after {attempts} attempts: {reason}")]
    DeleteFailed {
        /// The file that survived every attempt
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Last OS-reported reason
        reason: String,
    },
}
