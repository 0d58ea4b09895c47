//! # guild-jukebox
//!
//! Per-session voice playback orchestration for chat bots.
//!
//! ## Design Philosophy
//!
//! guild-jukebox is designed to be:
//! - **Platform-agnostic** - The voice stack, media fetcher, and chat
//!   notifications are injected as traits
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! One [`Jukebox`] serves any number of sessions (one per guild/server).
//! Each session gets an ordered queue, loop mode, an idle timeout, and a
//! startup race that lets concurrent first requests compete for the engine.
//! Media fetches are deduplicated process-wide, and every downloaded file is
//! tracked until it can be safely deleted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use guild_jukebox::{Config, Jukebox, LogNotifier, SessionId, Track, YtDlpFetcher};
//! use std::sync::Arc;
//!
//! # struct MyVoiceStack;
//! # #[async_trait::async_trait]
//! # impl guild_jukebox::VoiceEngine for MyVoiceStack {
//! #     async fn connect(&self, _: SessionId) -> guild_jukebox::Result<()> { Ok(()) }
//! #     async fn disconnect(&self, _: SessionId) -> guild_jukebox::Result<()> { Ok(()) }
//! #     async fn play(&self, _: SessionId, _: &std::path::Path, _: f32,
//! #         _: tokio::sync::oneshot::Sender<Option<String>>) -> guild_jukebox::Result<()> { Ok(()) }
//! #     fn stop(&self, _: SessionId) -> bool { false }
//! #     fn pause(&self, _: SessionId) -> bool { false }
//! #     fn resume(&self, _: SessionId) -> bool { false }
//! #     fn is_playing(&self, _: SessionId) -> bool { false }
//! #     fn is_paused(&self, _: SessionId) -> bool { false }
//! #     fn name(&self) -> &'static str { "my-voice-stack" }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let fetcher = Arc::new(YtDlpFetcher::from_config(&config.fetch)?);
//!     let jukebox = Jukebox::new(
//!         config,
//!         fetcher,
//!         Arc::new(MyVoiceStack),
//!         Arc::new(LogNotifier),
//!     )
//!     .await?;
//!
//!     // Subscribe to events
//!     let mut events = jukebox.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let session = SessionId::new(1);
//!     jukebox
//!         .request(session, Track::new("https://youtu.be/dQw4w9WgXcQ", "alice"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Voice engine abstraction and playback wrapper
pub mod engine;
/// Error types
pub mod error;
/// Media fetching via an external tool
pub mod fetch;
/// Media file protection and deferred deletion
pub mod files;
/// Idle session timers
pub mod idle;
/// Chat notification abstraction
pub mod notify;
/// Core orchestrator implementation (decomposed into focused submodules)
pub mod orchestrator;
/// Global fetch deduplication
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-session playback state
pub mod session;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{CleanupConfig, Config, FetchConfig, IdleConfig, PlaybackConfig, RetryConfig};
pub use engine::{PlaybackHandle, VoiceEngine};
pub use error::{Error, FetchError, FileError, PlaybackError, Result};
pub use fetch::{MediaFetcher, YtDlpFetcher};
pub use files::FileLifecycleManager;
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::Jukebox;
pub use registry::DownloadRegistry;
pub use types::{
    ContentKey, Event, FetchState, FetchedMedia, RequestOutcome, SessionId, SessionStats, Track,
};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls the jukebox's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use guild_jukebox::{Config, Jukebox, LogNotifier, YtDlpFetcher, run_with_shutdown};
/// # use guild_jukebox::{Result, SessionId};
/// # use std::sync::Arc;
/// # struct MyVoiceStack;
/// # #[async_trait::async_trait]
/// # impl guild_jukebox::VoiceEngine for MyVoiceStack {
/// #     async fn connect(&self, _: SessionId) -> Result<()> { Ok(()) }
/// #     async fn disconnect(&self, _: SessionId) -> Result<()> { Ok(()) }
/// #     async fn play(&self, _: SessionId, _: &std::path::Path, _: f32,
/// #         _: tokio::sync::oneshot::Sender<Option<String>>) -> Result<()> { Ok(()) }
/// #     fn stop(&self, _: SessionId) -> bool { false }
/// #     fn pause(&self, _: SessionId) -> bool { false }
/// #     fn resume(&self, _: SessionId) -> bool { false }
/// #     fn is_playing(&self, _: SessionId) -> bool { false }
/// #     fn is_paused(&self, _: SessionId) -> bool { false }
/// #     fn name(&self) -> &'static str { "my-voice-stack" }
/// # }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let fetcher = Arc::new(YtDlpFetcher::from_config(&config.fetch)?);
///     let jukebox = Jukebox::new(config, fetcher, Arc::new(MyVoiceStack), Arc::new(LogNotifier)).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(jukebox).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(jukebox: Jukebox) {
    wait_for_signal().await;
    jukebox.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
