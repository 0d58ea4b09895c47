//! Global fetch deduplication
//!
//! One registry is shared by every session. At most one fetch per content key
//! is ever in flight process-wide: the first requester becomes the owner and
//! runs the external tool, everyone else parks on the entry and is woken when
//! the owner finishes. Completed and failed entries are terminal until an
//! explicit per-session cleanup pass drops them.

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use crate::fetch::MediaFetcher;
use crate::types::{ContentKey, FetchState, FetchedMedia, SessionId, Track};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

struct FetchEntry {
    state: FetchState,
    result: Option<FetchedMedia>,
    error: Option<String>,
    done: Arc<Notify>,
}

impl FetchEntry {
    fn downloading() -> Self {
        Self {
            state: FetchState::Downloading,
            result: None,
            error: None,
            done: Arc::new(Notify::new()),
        }
    }
}

/// What a caller holds after the admission check on the fetch table
enum Claim {
    /// This caller inserted the Downloading entry and runs the fetch
    Owner,
    /// Someone else is fetching; park on their completion signal
    Waiter(Arc<Notify>),
    /// Terminal entry already present
    Ready(FetchedMedia),
    /// Terminal failure already present
    Failed(String),
}

/// Shared single-flight fetch table with per-session bookkeeping
#[derive(Clone)]
pub struct DownloadRegistry {
    fetcher: Arc<dyn MediaFetcher>,
    table: Arc<Mutex<HashMap<ContentKey, FetchEntry>>>,
    session_keys: Arc<Mutex<HashMap<SessionId, HashSet<ContentKey>>>>,
    wait_timeout: Duration,
    wait_step: Duration,
    max_preload: usize,
}

impl DownloadRegistry {
    /// Create a registry around the given fetcher
    pub fn new(fetcher: Arc<dyn MediaFetcher>, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            table: Arc::new(Mutex::new(HashMap::new())),
            session_keys: Arc::new(Mutex::new(HashMap::new())),
            wait_timeout: config.wait_timeout,
            wait_step: config.wait_step,
            max_preload: config.max_preload,
        }
    }

    /// Fetch content, deduplicating against every other session
    ///
    /// The first caller for a key runs the external fetch; concurrent callers
    /// block in bounded steps until the owner finishes or the wait deadline
    /// passes. A key whose previous fetch failed returns the cached failure
    /// until [`cleanup`](Self::cleanup) drops the entry.
    pub async fn fetch(&self, session: SessionId, content_ref: &str) -> Result<FetchedMedia> {
        let key = ContentKey::from_ref(content_ref);

        self.session_keys
            .lock()
            .await
            .entry(session)
            .or_default()
            .insert(key.clone());

        let claim = {
            let mut table = self.table.lock().await;
            match table.get(&key) {
                None => {
                    table.insert(key.clone(), FetchEntry::downloading());
                    Claim::Owner
                }
                Some(entry) => match entry.state {
                    FetchState::Downloading => Claim::Waiter(entry.done.clone()),
                    FetchState::Completed => match &entry.result {
                        Some(media) => Claim::Ready(media.clone()),
                        // Completed entries always carry a result; treat a
                        // hole as a failure rather than panic
                        None => Claim::Failed("completed entry lost its result".to_string()),
                    },
                    FetchState::Failed => Claim::Failed(
                        entry
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown fetch failure".to_string()),
                    ),
                },
            }
        };

        match claim {
            Claim::Ready(media) => {
                debug!(%session, %key, "fetch served from completed entry");
                Ok(media)
            }
            Claim::Failed(reason) => Err(Error::Fetch(FetchError::PreviouslyFailed {
                content_ref: content_ref.to_string(),
                reason,
            })),
            Claim::Owner => self.run_fetch(session, key, content_ref).await,
            Claim::Waiter(done) => self.wait_for(session, key, content_ref, done).await,
        }
    }

    /// Owner path: run the external fetch and publish the terminal state
    async fn run_fetch(
        &self,
        session: SessionId,
        key: ContentKey,
        content_ref: &str,
    ) -> Result<FetchedMedia> {
        debug!(%session, %key, content_ref, fetcher = self.fetcher.name(), "starting fetch");
        let result = self.fetcher.fetch(content_ref).await;

        let mut table = self.table.lock().await;
        // The Downloading entry is never evicted, so it is still here
        if let Some(entry) = table.get_mut(&key) {
            match &result {
                Ok(media) => {
                    entry.state = FetchState::Completed;
                    entry.result = Some(media.clone());
                }
                Err(e) => {
                    entry.state = FetchState::Failed;
                    entry.error = Some(e.to_string());
                }
            }
            entry.done.notify_waiters();
        } else {
            warn!(%key, "fetch entry vanished while downloading");
        }

        result
    }

    /// Waiter path: park on the owner's completion signal in bounded steps
    async fn wait_for(
        &self,
        session: SessionId,
        key: ContentKey,
        content_ref: &str,
        done: Arc<Notify>,
    ) -> Result<FetchedMedia> {
        debug!(%session, %key, "waiting on in-flight fetch");
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            // Register for the wakeup before re-reading state, so a
            // notify_waiters between the check and the await is not lost
            let notified = done.notified();

            {
                let table = self.table.lock().await;
                match table.get(&key).map(|entry| entry.state) {
                    Some(FetchState::Completed) => {
                        let media = table
                            .get(&key)
                            .and_then(|entry| entry.result.clone())
                            .ok_or_else(|| {
                                Error::Fetch(FetchError::OutputMissing {
                                    content_ref: content_ref.to_string(),
                                })
                            })?;
                        debug!(%session, %key, "in-flight fetch completed");
                        return Ok(media);
                    }
                    Some(FetchState::Failed) => {
                        let reason = table
                            .get(&key)
                            .and_then(|entry| entry.error.clone())
                            .unwrap_or_else(|| "unknown fetch failure".to_string());
                        return Err(Error::Fetch(FetchError::PreviouslyFailed {
                            content_ref: content_ref.to_string(),
                            reason,
                        }));
                    }
                    Some(FetchState::Downloading) => {}
                    // Entry evicted out from under us; the content is simply
                    // not available anymore
                    None => {
                        return Err(Error::Fetch(FetchError::OutputMissing {
                            content_ref: content_ref.to_string(),
                        }));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%session, %key, "gave up waiting on in-flight fetch");
                return Err(Error::Fetch(FetchError::WaitTimeout {
                    content_ref: content_ref.to_string(),
                    waited_secs: self.wait_timeout.as_secs(),
                }));
            }

            let step = self.wait_step.min(deadline - now);
            let _ = tokio::time::timeout(step, notified).await;
        }
    }

    /// Prefetch the first `max_preload` upcoming tracks in the background
    ///
    /// Never blocks; tracks whose key already has any table entry are skipped.
    /// Worker failures are recorded in the table and logged, not surfaced.
    pub async fn preload(&self, session: SessionId, upcoming: &[Track]) {
        for track in upcoming.iter().take(self.max_preload) {
            let key = track.content_key();
            if self.table.lock().await.contains_key(&key) {
                continue;
            }

            let registry = self.clone();
            let content_ref = track.content_ref.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.fetch(session, &content_ref).await {
                    debug!(%session, content_ref, error = %e, "preload fetch failed");
                }
            });
        }
    }

    /// Whether a completed media file is ready for this content
    pub async fn is_ready(&self, content_ref: &str) -> bool {
        self.status(content_ref).await == Some(FetchState::Completed)
    }

    /// Current fetch state of a content reference, if any
    pub async fn status(&self, content_ref: &str) -> Option<FetchState> {
        let key = ContentKey::from_ref(content_ref);
        self.table.lock().await.get(&key).map(|entry| entry.state)
    }

    /// Whether any of the session's fetches is still in flight
    pub async fn has_inflight(&self, session: SessionId) -> bool {
        let keys = match self.session_keys.lock().await.get(&session) {
            Some(keys) => keys.clone(),
            None => return false,
        };
        let table = self.table.lock().await;
        keys.iter()
            .any(|key| table.get(key).map(|entry| entry.state) == Some(FetchState::Downloading))
    }

    /// Local file of a completed fetch, if available
    pub async fn completed_file(&self, content_ref: &str) -> Option<FetchedMedia> {
        let key = ContentKey::from_ref(content_ref);
        let table = self.table.lock().await;
        table.get(&key).and_then(|entry| entry.result.clone())
    }

    /// Drop the terminal entries associated with a session
    ///
    /// Keys still referenced by another session are kept, and Downloading
    /// entries are never evicted: evicting one would let a second fetch of
    /// the same key start while the first is still running. In-flight results
    /// become terminal entries that the next cleanup pass drops.
    pub async fn cleanup(&self, session: SessionId) {
        let Some(keys) = self.session_keys.lock().await.remove(&session) else {
            return;
        };

        let sessions = self.session_keys.lock().await;
        let mut table = self.table.lock().await;
        let mut dropped = 0;
        for key in keys {
            let still_referenced = sessions.values().any(|set| set.contains(&key));
            if still_referenced {
                continue;
            }
            if let Some(entry) = table.get(&key)
                && entry.state != FetchState::Downloading
            {
                table.remove(&key);
                dropped += 1;
            }
        }
        drop(table);
        drop(sessions);

        if dropped > 0 {
            debug!(%session, dropped, "dropped terminal fetch entries");
        }
    }
}
