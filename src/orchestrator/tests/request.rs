//! Admission outcomes and the basic request-to-playback path.

use crate::engine::VoiceEngine;
use crate::orchestrator::test_helpers::{fixture, settle};
use crate::orchestrator::tests::drain_events;
use crate::types::{Event, RequestOutcome, SessionId, Track};

#[tokio::test]
async fn first_request_starts_playback() {
    let f = fixture().await;
    let session = SessionId::new(1);
    let mut rx = f.jukebox.subscribe();

    let outcome = f
        .jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Starting);

    settle().await;
    assert!(f.engine.is_playing(session));
    assert_eq!(f.engine.connects.load(std::sync::atomic::Ordering::SeqCst), 1);

    let now_playing = f.jukebox.now_playing(session).await.unwrap();
    assert_eq!(
        now_playing.title, "Title of song-a",
        "fetch metadata must enrich the track title"
    );
    assert!(now_playing.local_file.is_some());

    let events = drain_events(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::PlaybackStarted { .. })),
        "expected a playback_started event, got {events:?}"
    );
}

#[tokio::test]
async fn request_while_playing_is_queued() {
    let f = fixture().await;
    let session = SessionId::new(1);

    f.jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    settle().await;

    let outcome = f
        .jukebox
        .request(session, Track::new("song-b", "bob"))
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Queued { position: 1 });

    let outcome = f
        .jukebox
        .request(session, Track::new("song-c", "carol"))
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::Queued { position: 2 });

    let queue = f.jukebox.queue_snapshot(session).await;
    let refs: Vec<_> = queue.iter().map(|t| t.content_ref.as_str()).collect();
    assert_eq!(refs, vec!["song-b", "song-c"]);
}

#[tokio::test]
async fn queued_tracks_are_preloaded_in_the_background() {
    let f = fixture().await;
    let session = SessionId::new(1);

    f.jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    settle().await;

    f.jukebox
        .request(session, Track::new("song-b", "bob"))
        .await
        .unwrap();
    settle().await;

    assert!(
        f.jukebox.registry.is_ready("song-b").await,
        "queued track must be fetched ahead of playback"
    );
}

#[tokio::test]
async fn request_during_startup_races() {
    let f = fixture().await;
    let session = SessionId::new(1);

    f.fetcher.hold("song-a").await;
    let first = f
        .jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    assert_eq!(first, RequestOutcome::Starting);

    f.fetcher.hold("song-b").await;
    let second = f
        .jukebox
        .request(session, Track::new("song-b", "bob"))
        .await
        .unwrap();
    assert_eq!(second, RequestOutcome::Racing);

    f.fetcher.release("song-a").await;
    f.fetcher.release("song-b").await;
    settle().await;

    assert!(f.engine.is_playing(session));
    let stats = f.jukebox.session_stats(session).await.unwrap();
    assert_eq!(
        stats.queue_len + usize::from(stats.now_playing.is_some()),
        2,
        "both racers must end up either playing or queued"
    );
    assert_eq!(stats.pending_requests, 0, "the race buffer must be drained");
}

#[tokio::test]
async fn failed_startup_fetch_leaves_the_session_idle() {
    let f = fixture().await;
    let session = SessionId::new(1);
    let mut rx = f.jukebox.subscribe();

    f.fetcher.fail("broken");
    f.jukebox
        .request(session, Track::new("broken", "alice"))
        .await
        .unwrap();
    settle().await;

    assert!(!f.engine.is_playing(session));
    let stats = f.jukebox.session_stats(session).await.unwrap();
    assert!(stats.now_playing.is_none());
    assert_eq!(stats.queue_len, 0);

    let events = drain_events(&mut rx);
    assert!(
        events.iter().any(|e| matches!(e, Event::FetchFailed { .. })),
        "expected a fetch_failed event, got {events:?}"
    );
    assert!(
        f.notifier
            .messages()
            .iter()
            .any(|(_, msg)| msg.contains("Could not fetch")),
        "the user must be told about the failed fetch"
    );
}

#[tokio::test]
async fn duplicate_reference_is_fetched_once() {
    let f = fixture().await;
    let mut handles = Vec::new();
    for i in 0..4 {
        let jukebox = f.jukebox.clone();
        handles.push(tokio::spawn(async move {
            jukebox
                .request(SessionId::new(10 + i), Track::new("shared-song", "alice"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    settle().await;

    assert_eq!(
        f.fetcher.calls(),
        1,
        "the same reference across sessions must hit the tool once"
    );
}
