//! Shared mocks and fixtures for orchestrator tests.

use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::fetch::MediaFetcher;
use crate::notify::Notifier;
use crate::orchestrator::Jukebox;
use crate::types::{FetchedMedia, SessionId};
use crate::engine::VoiceEngine;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, oneshot};

/// Fetcher that writes real files and can gate or fail specific references
pub(crate) struct MockFetcher {
    dir: PathBuf,
    calls: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: StdMutex<HashSet<String>>,
}

impl MockFetcher {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            calls: AtomicUsize::new(0),
            gates: Mutex::new(HashMap::new()),
            failing: StdMutex::new(HashSet::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Block fetches of this reference until [`release`](Self::release)
    pub(crate) async fn hold(&self, content_ref: &str) {
        self.gates
            .lock()
            .await
            .insert(content_ref.to_string(), Arc::new(Notify::new()));
    }

    /// Unblock a held reference
    pub(crate) async fn release(&self, content_ref: &str) {
        if let Some(gate) = self.gates.lock().await.remove(content_ref) {
            gate.notify_one();
        }
    }

    /// Make fetches of this reference fail
    pub(crate) fn fail(&self, content_ref: &str) {
        self.failing.lock().unwrap().insert(content_ref.to_string());
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, content_ref: &str) -> Result<FetchedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().await.get(content_ref).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.lock().unwrap().contains(content_ref) {
            return Err(Error::Fetch(FetchError::ToolFailed {
                content_ref: content_ref.to_string(),
                reason: "mock failure".to_string(),
            }));
        }

        let name: String = content_ref
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let file = self.dir.join(format!("{name}.mp3"));
        tokio::fs::write(&file, b"media").await?;

        Ok(FetchedMedia {
            title: format!("Title of {content_ref}"),
            local_file: file,
            duration_secs: Some(120),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Clone, Copy, PartialEq)]
enum EngineState {
    Playing,
    Paused,
}

/// Engine mock with manually resolvable completion channels
#[derive(Default)]
pub(crate) struct MockVoiceEngine {
    states: StdMutex<HashMap<SessionId, EngineState>>,
    done: StdMutex<HashMap<SessionId, oneshot::Sender<Option<String>>>>,
    pub(crate) connects: AtomicUsize,
    pub(crate) disconnects: AtomicUsize,
    pub(crate) plays: AtomicUsize,
}

impl MockVoiceEngine {
    /// Resolve the session's play attempt as the engine would at track end
    pub(crate) fn finish(&self, session: SessionId, error: Option<String>) {
        self.states.lock().unwrap().remove(&session);
        if let Some(done) = self.done.lock().unwrap().remove(&session) {
            done.send(error).ok();
        }
    }
}

#[async_trait]
impl VoiceEngine for MockVoiceEngine {
    async fn connect(&self, _session: SessionId) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _session: SessionId) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn play(
        &self,
        session: SessionId,
        _source: &Path,
        _volume: f32,
        done: oneshot::Sender<Option<String>>,
    ) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .unwrap()
            .insert(session, EngineState::Playing);
        self.done.lock().unwrap().insert(session, done);
        Ok(())
    }

    fn stop(&self, session: SessionId) -> bool {
        let was_active = self.states.lock().unwrap().remove(&session).is_some();
        if let Some(done) = self.done.lock().unwrap().remove(&session) {
            done.send(None).ok();
        }
        was_active
    }

    fn pause(&self, session: SessionId) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get(&session) {
            Some(EngineState::Playing) => {
                states.insert(session, EngineState::Paused);
                true
            }
            _ => false,
        }
    }

    fn resume(&self, session: SessionId) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get(&session) {
            Some(EngineState::Paused) => {
                states.insert(session, EngineState::Playing);
                true
            }
            _ => false,
        }
    }

    fn is_playing(&self, session: SessionId) -> bool {
        self.states.lock().unwrap().get(&session).copied() == Some(EngineState::Playing)
    }

    fn is_paused(&self, session: SessionId) -> bool {
        self.states.lock().unwrap().get(&session).copied() == Some(EngineState::Paused)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Notifier that records every message
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: StdMutex<Vec<(SessionId, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn messages(&self) -> Vec<(SessionId, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, session: SessionId, _channel: Option<u64>, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((session, message.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Fully wired orchestrator with short timers and mock collaborators
pub(crate) struct Fixture {
    pub(crate) jukebox: Jukebox,
    pub(crate) fetcher: Arc<MockFetcher>,
    pub(crate) engine: Arc<MockVoiceEngine>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

pub(crate) async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.fetch.download_dir = dir.path().join("downloads");
    config.fetch.wait_timeout = Duration::from_secs(2);
    config.fetch.wait_step = Duration::from_millis(20);
    config.cleanup.temp_dir = dir.path().join("temp");
    config.idle.timeout = Duration::from_millis(200);
    config.playback.finish_wait = Duration::from_millis(200);

    let fetcher = Arc::new(MockFetcher::new(config.fetch.download_dir.clone()));
    let engine = Arc::new(MockVoiceEngine::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let jukebox = Jukebox::new(
        config,
        fetcher.clone(),
        engine.clone(),
        notifier.clone(),
    )
    .await
    .unwrap();

    Fixture {
        jukebox,
        fetcher,
        engine,
        notifier,
        _dir: dir,
    }
}

/// Give spawned workers time to land
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}
