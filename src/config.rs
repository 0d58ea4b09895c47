//! Configuration types for guild-jukebox
//!
//! All sub-configs deserialize with sensible defaults, so an empty config is a
//! fully working configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content fetching configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Playback configuration
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Idle session reclamation
    #[serde(default)]
    pub idle: IdleConfig,

    /// Downloaded file cleanup
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.fetch.download_dir
    }

    /// Temporary directory used by the deletion fallback
    pub fn temp_dir(&self) -> &PathBuf {
        &self.cleanup.temp_dir
    }

    /// Path of the persisted pending-deletion list
    pub fn pending_list_path(&self) -> PathBuf {
        match &self.cleanup.pending_list {
            Some(path) => path.clone(),
            None => self.fetch.download_dir.join("pending_deletions.txt"),
        }
    }
}

/// Content fetching configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Directory media files are downloaded into (default: ./downloads)
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Explicit path to the fetch tool binary (default: search PATH)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,

    /// Audio container format passed to the tool (default: mp3)
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Audio quality passed to the tool (default: 320)
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,

    /// Total time a request waits on another session's in-flight fetch of the
    /// same content before giving up (default: 90 seconds)
    #[serde(default = "default_wait_timeout", with = "duration_serde")]
    pub wait_timeout: Duration,

    /// Polling step used while waiting on an in-flight fetch (default: 10 seconds)
    #[serde(default = "default_wait_step", with = "duration_serde")]
    pub wait_step: Duration,

    /// How many upcoming queue entries to prefetch (default: 3)
    #[serde(default = "default_max_preload")]
    pub max_preload: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            tool_path: None,
            audio_format: default_audio_format(),
            audio_quality: default_audio_quality(),
            wait_timeout: default_wait_timeout(),
            wait_step: default_wait_step(),
            max_preload: default_max_preload(),
        }
    }
}

/// Playback configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Volume hint passed to the voice engine, 0.0 to 1.0 (default: 0.5)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// How long shutdown waits for in-flight play attempts and the deletion
    /// queue to drain (default: 30 seconds)
    #[serde(default = "default_finish_wait", with = "duration_serde")]
    pub finish_wait: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            finish_wait: default_finish_wait(),
        }
    }
}

/// Idle session reclamation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdleConfig {
    /// How long a session may sit with an empty queue and nothing playing
    /// before it is disconnected (default: 300 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout: default_idle_timeout(),
        }
    }
}

/// Downloaded file cleanup configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Directory used by the move-aside deletion fallback (default: ./temp)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Override for the pending-deletion list location
    /// (default: `pending_deletions.txt` inside the download directory)
    #[serde(default)]
    pub pending_list: Option<PathBuf>,

    /// Age past which leftover media files are purged on startup (default: 1 hour)
    #[serde(default = "default_stale_after", with = "duration_serde")]
    pub stale_after: Duration,

    /// Retry policy for the deletion worker
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            pending_list: None,
            stale_after: default_stale_after(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt, so an operation
    /// runs at most `max_attempts + 1` times (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_audio_quality() -> String {
    "320".to_string()
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_wait_step() -> Duration {
    Duration::from_secs(10)
}

fn default_max_preload() -> usize {
    3
}

fn default_volume() -> f32 {
    0.5
}

fn default_finish_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
