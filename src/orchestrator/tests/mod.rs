//! Orchestrator integration tests built on the mock collaborators.

mod idle;
mod request;

use crate::types::Event;
use tokio::sync::broadcast;

/// Drain everything currently buffered on an event subscription
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
