//! Downloaded media file lifecycle
//!
//! Deletion is best-effort and never blocks playback: a file that cannot be
//! removed right away is handed to a lazily started background worker that
//! retries with backoff, falls back to moving the file aside, and as a last
//! resort records the path in a persisted pending-deletion list that later
//! startups sweep.

use crate::config::Config;
use crate::config::RetryConfig;
use crate::retry::retry_with_backoff;
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extensions the stale-file purge treats as media
const MEDIA_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "ogg", "wav", "flac", "webm"];

/// A file waiting in the background deletion queue
#[derive(Clone, Debug)]
struct DeletionEntry {
    path: PathBuf,
    session: SessionId,
    enqueued_at: DateTime<Utc>,
}

/// Manages downloaded media files: protection, deletion, and leftovers
///
/// Cheap to clone; all state is shared. The protected set holds files that
/// loop mode will replay and that must survive the post-playback cleanup.
#[derive(Clone)]
pub struct FileLifecycleManager {
    download_dir: PathBuf,
    temp_dir: PathBuf,
    pending_list: PathBuf,
    retry: RetryConfig,
    protected: Arc<Mutex<HashSet<PathBuf>>>,
    queue: Arc<Mutex<VecDeque<DeletionEntry>>>,
    worker_active: Arc<AtomicBool>,
}

impl FileLifecycleManager {
    /// Create a manager from configuration
    pub fn new(config: &Config) -> Self {
        Self {
            download_dir: config.fetch.download_dir.clone(),
            temp_dir: config.cleanup.temp_dir.clone(),
            pending_list: config.pending_list_path(),
            retry: config.cleanup.retry.clone(),
            protected: Arc::new(Mutex::new(HashSet::new())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            worker_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark a file as protected from deletion (loop mode replays it)
    pub async fn protect(&self, path: &Path) {
        let path = canonical(path);
        debug!(file = %path.display(), "protecting file");
        self.protected.lock().await.insert(path);
    }

    /// Remove deletion protection from a file
    pub async fn unprotect(&self, path: &Path) {
        let path = canonical(path);
        debug!(file = %path.display(), "unprotecting file");
        self.protected.lock().await.remove(&path);
    }

    /// Whether a file is currently protected
    pub async fn is_protected(&self, path: &Path) -> bool {
        self.protected.lock().await.contains(&canonical(path))
    }

    /// Delete a media file
    ///
    /// Protected files are deferred (a no-op success) unless `force` is set.
    /// A missing file counts as success. An OS error hands the file to the
    /// background deletion worker; the failure is never surfaced to callers.
    pub async fn delete(&self, path: &Path, session: SessionId, force: bool) {
        let path = canonical(path);

        if !force && self.protected.lock().await.contains(&path) {
            debug!(%session, file = %path.display(), "deletion deferred, file is protected");
            return;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(%session, file = %path.display(), "deleted media file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%session, file = %path.display(), "file already gone");
            }
            Err(e) => {
                warn!(
                    %session,
                    file = %path.display(),
                    error = %e,
                    "immediate deletion failed, queueing for background deletion"
                );
                self.enqueue(path, session).await;
            }
        }
    }

    /// Number of entries waiting in the deletion queue
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Wait until the deletion queue is empty and the worker has stopped
    ///
    /// Used by shutdown (bounded by the caller) and by tests.
    pub async fn wait_for_drain(&self) {
        loop {
            if self.queue.lock().await.is_empty() && !self.worker_active.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn enqueue(&self, path: PathBuf, session: SessionId) {
        self.queue.lock().await.push_back(DeletionEntry {
            path,
            session,
            enqueued_at: Utc::now(),
        });
        self.spawn_worker_if_idle();
    }

    /// Start the deletion worker if one is not already running
    fn spawn_worker_if_idle(&self) {
        if self
            .worker_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let manager = self.clone();
            tokio::spawn(async move { manager.drain().await });
        }
    }

    async fn drain(self) {
        debug!("deletion worker started");
        loop {
            let entry = self.queue.lock().await.pop_front();
            match entry {
                Some(entry) => self.process_entry(entry).await,
                None => {
                    self.worker_active.store(false, Ordering::Release);
                    // A producer may have enqueued between the empty pop and
                    // the flag clear; re-claim the worker slot if so
                    if self.queue.lock().await.is_empty() {
                        break;
                    }
                    if self
                        .worker_active
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        debug!("deletion worker stopped");
    }

    async fn process_entry(&self, entry: DeletionEntry) {
        let path = entry.path.clone();
        let result = retry_with_backoff(&self.retry, || {
            let path = path.clone();
            async move {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(
                    session = %entry.session,
                    file = %entry.path.display(),
                    queued_at = %entry.enqueued_at,
                    "background deletion succeeded"
                );
            }
            Err(e) => {
                warn!(
                    session = %entry.session,
                    file = %entry.path.display(),
                    error = %e,
                    "deletion retries exhausted, trying move-aside fallback"
                );
                if let Err(e) = self.move_aside_delete(&entry.path).await {
                    warn!(
                        file = %entry.path.display(),
                        error = %e,
                        "move-aside fallback failed, recording in pending-deletion list"
                    );
                    self.append_pending(&entry.path).await;
                }
            }
        }
    }

    /// Move the file into the temp directory and delete it there
    ///
    /// Renaming sidesteps handles that block unlink-in-place on some
    /// platforms. If the post-move delete still fails the moved file is
    /// recorded as pending, which still counts as handled.
    async fn move_aside_delete(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let dest = self
            .temp_dir
            .join(format!("{}-{}", Utc::now().timestamp_micros(), file_name));

        tokio::fs::rename(path, &dest).await?;
        debug!(from = %path.display(), to = %dest.display(), "moved file aside");

        if let Err(e) = tokio::fs::remove_file(&dest).await {
            warn!(file = %dest.display(), error = %e, "post-move delete failed");
            self.append_pending(&dest).await;
        }

        // Drop the temp dir again if this was the only straggler
        let _ = tokio::fs::remove_dir(&self.temp_dir).await;
        Ok(())
    }

    /// Append a path to the persisted pending-deletion list
    async fn append_pending(&self, path: &Path) {
        if let Some(parent) = self.pending_list.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(error = %e, "could not create pending-list directory");
            return;
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.pending_list)
                .await?;
            file.write_all(format!("{}\n", path.display()).as_bytes())
                .await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => info!(
                file = %path.display(),
                list = %self.pending_list.display(),
                "recorded file in pending-deletion list"
            ),
            Err(e) => warn!(
                file = %path.display(),
                error = %e,
                "could not persist pending deletion; file will leak until the stale purge"
            ),
        }
    }

    /// Re-attempt every deletion recorded in the pending list
    ///
    /// Runs on startup and during shutdown. Paths that still fail stay in the
    /// list; the list file is removed once everything is gone. Returns the
    /// number of files actually removed.
    pub async fn sweep_pending(&self) -> usize {
        let contents = match tokio::fs::read_to_string(&self.pending_list).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(list = %self.pending_list.display(), error = %e, "could not read pending-deletion list");
                return 0;
            }
        };

        let mut removed = 0;
        let mut survivors = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let path = PathBuf::from(line);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(file = %path.display(), "swept pending deletion");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => removed += 1,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "pending deletion still failing");
                    survivors.push(line.to_string());
                }
            }
        }

        let rewrite = if survivors.is_empty() {
            tokio::fs::remove_file(&self.pending_list).await.or_else(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            })
        } else {
            tokio::fs::write(&self.pending_list, survivors.join("\n") + "\n").await
        };
        if let Err(e) = rewrite {
            warn!(list = %self.pending_list.display(), error = %e, "could not rewrite pending-deletion list");
        }

        if removed > 0 {
            info!(removed, remaining = survivors.len(), "pending-deletion sweep complete");
        }
        removed
    }

    /// Remove unprotected media files in the download directory older than
    /// `max_age`. Returns the number of files removed.
    ///
    /// Catches leftovers from crashes and from fetches whose session vanished.
    pub async fn purge_stale(&self, max_age: Duration) -> usize {
        let cutoff = std::time::SystemTime::now() - max_age;
        let mut entries = match tokio::fs::read_dir(&self.download_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.download_dir.display(), error = %e, "skipping stale purge");
                return 0;
            }
        };

        let protected = self.protected.lock().await.clone();
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_media = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_media || protected.contains(&canonical(&path)) {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(file = %path.display(), "purged stale media file");
                }
                Err(e) => warn!(file = %path.display(), error = %e, "could not purge stale file"),
            }
        }

        if removed > 0 {
            info!(removed, "purged stale media files");
        }
        removed
    }
}

/// Normalize to an absolute path so the protected set and deletion queue key
/// consistently no matter how callers spell the path
fn canonical(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
