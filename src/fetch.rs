//! Media fetching via an external fetch-and-transcode tool
//!
//! The orchestrator only sees the [`MediaFetcher`] trait; the production
//! implementation shells out to `yt-dlp`. Tests inject mock fetchers.

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::FetchedMedia;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

/// Fetches a piece of content and produces a local media file
///
/// Implementations must be safe to call concurrently; the registry already
/// guarantees at most one in-flight fetch per content key, but different keys
/// fetch in parallel.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the content behind `content_ref` and transcode it to a local
    /// audio file. Slow by nature; callers run this on background tasks.
    async fn fetch(&self, content_ref: &str) -> Result<FetchedMedia>;

    /// Implementation name for logging
    fn name(&self) -> &'static str;
}

/// Production fetcher shelling out to the `yt-dlp` binary
pub struct YtDlpFetcher {
    binary_path: PathBuf,
    download_dir: PathBuf,
    audio_format: String,
    audio_quality: String,
}

impl YtDlpFetcher {
    /// Create a fetcher with an explicit binary path
    pub fn new(binary_path: PathBuf, config: &FetchConfig) -> Self {
        Self {
            binary_path,
            download_dir: config.download_dir.clone(),
            audio_format: config.audio_format.clone(),
            audio_quality: config.audio_quality.clone(),
        }
    }

    /// Build a fetcher from configuration: use the configured binary path if
    /// set, otherwise search PATH for `yt-dlp`.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let binary_path = match &config.tool_path {
            Some(path) => path.clone(),
            None => which::which("yt-dlp").map_err(|_| {
                Error::Fetch(FetchError::ToolNotFound(
                    "yt-dlp not found in PATH".to_string(),
                ))
            })?,
        };
        Ok(Self::new(binary_path, config))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedMedia> {
        let source = normalize_content_ref(content_ref)?;
        debug!(content_ref, source, "invoking fetch tool");

        let template = self
            .download_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned();

        let started = SystemTime::now();
        let output = Command::new(&self.binary_path)
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("--audio-quality")
            .arg(&self.audio_quality)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-simulate")
            .arg("--print")
            .arg("title")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--output")
            .arg(&template)
            .arg(&source)
            .output()
            .await
            .map_err(|e| {
                Error::Fetch(FetchError::ToolFailed {
                    content_ref: content_ref.to_string(),
                    reason: format!("failed to execute yt-dlp: {e}"),
                })
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no error output")
                .to_string();
            return Err(Error::Fetch(FetchError::ToolFailed {
                content_ref: content_ref.to_string(),
                reason,
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().filter(|line| !line.trim().is_empty());
        let title = lines.next().map(str::to_string);
        let printed_path = lines.next_back().map(PathBuf::from);

        // Prefer the tool-reported path; fall back to the newest media file
        // in the download directory for tool versions without after_move
        let local_file = match printed_path {
            Some(path) if tokio::fs::metadata(&path).await.is_ok() => path,
            _ => newest_media_file(&self.download_dir, &self.audio_format, started)
                .await
                .ok_or_else(|| {
                    Error::Fetch(FetchError::OutputMissing {
                        content_ref: content_ref.to_string(),
                    })
                })?,
        };

        let title = title.unwrap_or_else(|| {
            local_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| content_ref.to_string())
        });

        debug!(content_ref, file = %local_file.display(), "fetch complete");
        Ok(FetchedMedia {
            title,
            local_file,
            duration_secs: None,
        })
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn video_id_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        regex::Regex::new(r"^[A-Za-z0-9_-]{10,12}$").expect("static pattern is valid")
    })
}

/// Normalize a content reference into something the fetch tool accepts
///
/// Short-link and embed URL forms are rewritten to the canonical watch form so
/// they all dedup to the same content key. Other http(s) URLs pass through
/// unchanged, and plain text becomes a single-result search.
pub fn normalize_content_ref(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Fetch(FetchError::InvalidReference {
            reference: raw.to_string(),
            reason: "empty reference".to_string(),
        }));
    }

    let Ok(parsed) = Url::parse(trimmed) else {
        // Not a URL at all: treat it as a search query
        return Ok(format!("ytsearch1:{trimmed}"));
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::Fetch(FetchError::InvalidReference {
            reference: raw.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        }));
    }

    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let video_id = if host == "youtu.be" {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else if host.ends_with("youtube.com") {
        let path = parsed.path();
        if let Some(id) = path.strip_prefix("/embed/").or(path.strip_prefix("/shorts/")) {
            Some(id.to_string())
        } else if path == "/watch" {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
        } else {
            None
        }
    } else {
        // Some other site the tool may support; pass through
        return Ok(trimmed.to_string());
    };

    match video_id {
        Some(id) if video_id_pattern().is_match(&id) => {
            Ok(format!("https://www.youtube.com/watch?v={id}"))
        }
        _ => Err(Error::Fetch(FetchError::InvalidReference {
            reference: raw.to_string(),
            reason: "could not extract a video id".to_string(),
        })),
    }
}

/// Find the newest file with the given extension modified at or after `since`
///
/// Fallback path resolution when the tool does not report the produced file.
async fn newest_media_file(dir: &Path, extension: &str, since: SystemTime) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not scan download directory");
            return None;
        }
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < since {
            continue;
        }
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }

    newest.map(|(_, path)| path)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // --- normalize_content_ref ---

    #[test]
    fn watch_url_is_preserved() {
        let result = normalize_content_ref("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(result, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn short_link_normalizes_to_watch_form() {
        let result = normalize_content_ref("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(result, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn embed_url_normalizes_to_watch_form() {
        let result = normalize_content_ref("https://www.youtube.com/embed/dQw4w9WgXcQ").unwrap();
        assert_eq!(result, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn shorts_url_normalizes_to_watch_form() {
        let result = normalize_content_ref("https://youtube.com/shorts/dQw4w9WgXcQ").unwrap();
        assert_eq!(result, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn all_url_forms_normalize_identically() {
        // The point of normalization: every form of the same video must
        // produce the same reference, and therefore the same dedup key
        let forms = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
        ];
        let normalized: Vec<String> = forms
            .iter()
            .map(|f| normalize_content_ref(f).unwrap())
            .collect();
        assert!(
            normalized.iter().all(|n| n == &normalized[0]),
            "all forms must normalize to the same reference: {normalized:?}"
        );
    }

    #[test]
    fn watch_url_with_extra_params_keeps_only_video_id() {
        let result =
            normalize_content_ref("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&t=42")
                .unwrap();
        assert_eq!(result, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn plain_text_becomes_search_query() {
        let result = normalize_content_ref("never gonna give you up").unwrap();
        assert_eq!(result, "ytsearch1:never gonna give you up");
    }

    #[test]
    fn non_youtube_url_passes_through() {
        let result = normalize_content_ref("https://example.com/media/song").unwrap();
        assert_eq!(result, "https://example.com/media/song");
    }

    #[test]
    fn empty_reference_is_rejected() {
        assert!(normalize_content_ref("   ").is_err());
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        assert!(normalize_content_ref("ftp://example.com/file").is_err());
    }

    #[test]
    fn youtube_url_without_video_id_is_rejected() {
        assert!(
            normalize_content_ref("https://www.youtube.com/watch").is_err(),
            "watch URL without v parameter has no video id"
        );
        assert!(normalize_content_ref("https://www.youtube.com/feed/trending").is_err());
    }

    // --- newest_media_file ---

    #[tokio::test]
    async fn newest_media_file_picks_latest_matching_extension() {
        let dir = tempfile::tempdir().unwrap();
        let epoch = SystemTime::UNIX_EPOCH;

        tokio::fs::write(dir.path().join("old.mp3"), b"a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::write(dir.path().join("ignored.txt"), b"b").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::write(dir.path().join("new.mp3"), b"c").await.unwrap();

        let found = newest_media_file(dir.path(), "mp3", epoch).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "new.mp3");
    }

    #[tokio::test]
    async fn newest_media_file_ignores_files_older_than_since() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("leftover.mp3"), b"a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let since = SystemTime::now();
        let found = newest_media_file(dir.path(), "mp3", since).await;
        assert!(
            found.is_none(),
            "files written before the fetch started must not be attributed to it"
        );
    }

    #[tokio::test]
    async fn newest_media_file_on_missing_dir_returns_none() {
        let found = newest_media_file(
            Path::new("/nonexistent/jukebox-test-dir"),
            "mp3",
            SystemTime::UNIX_EPOCH,
        )
        .await;
        assert!(found.is_none());
    }
}
