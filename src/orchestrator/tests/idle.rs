//! Idle timeout: disconnect after inactivity, with re-checks for late work.

use crate::engine::VoiceEngine;
use crate::orchestrator::test_helpers::{fixture, settle};
use crate::orchestrator::tests::drain_events;
use crate::types::{Event, SessionId, Track};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn idle_session_is_disconnected_and_reclaimed() {
    let f = fixture().await;
    let session = SessionId::new(1);
    let mut rx = f.jukebox.subscribe();

    f.jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    settle().await;
    let file = f
        .jukebox
        .now_playing(session)
        .await
        .unwrap()
        .local_file
        .unwrap();

    f.engine.finish(session, None);
    // Past the fixture's 200ms idle timeout
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(f.engine.disconnects.load(Ordering::SeqCst) >= 1);
    assert!(
        f.jukebox.session_stats(session).await.is_err(),
        "idle teardown must remove the session"
    );
    assert!(!file.exists(), "idle teardown must release the media file");

    let events = drain_events(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::IdleDisconnected { .. })),
        "expected idle_disconnected, got {events:?}"
    );
    assert!(
        f.notifier
            .messages()
            .iter()
            .any(|(_, msg)| msg.contains("inactivity")),
        "the user must be told before the bot leaves"
    );
}

#[tokio::test]
async fn new_request_cancels_the_idle_timer() {
    let f = fixture().await;
    let session = SessionId::new(1);

    f.jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    settle().await;
    f.engine.finish(session, None);
    settle().await;

    // Timer is armed; a new request lands before it expires
    f.jukebox
        .request(session, Track::new("song-b", "bob"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(f.engine.is_playing(session), "the new track must keep playing");
    assert_eq!(
        f.engine.disconnects.load(Ordering::SeqCst),
        0,
        "a cancelled idle timer must never disconnect"
    );
}

#[tokio::test]
async fn expiry_recheck_spares_a_busy_session() {
    let f = fixture().await;
    let session = SessionId::new(1);

    f.jukebox
        .request(session, Track::new("song-a", "alice"))
        .await
        .unwrap();
    settle().await;

    // Arm a timer directly, simulating a stale expiry against live playback
    f.jukebox.schedule_idle(session).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(f.engine.is_playing(session), "playback must survive the stale timer");
    assert_eq!(f.engine.disconnects.load(Ordering::SeqCst), 0);
    assert!(f.jukebox.session_stats(session).await.is_ok());
}
