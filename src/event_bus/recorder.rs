use std::sync::Arc;

use parking_lot::Mutex;

use super::event::Event;
use super::sink::EventSink;

/// Ordered, in-memory log of every event a run produced.
///
/// The recorder is a pure observer: appending to it is a synchronous push
/// under a short-lived lock, it never signals back to the scheduler, and a
/// run's outcomes are identical whether or not one is attached. Events
/// appear in occurrence order because the scheduler records them inline at
/// each transition, before any async fan-out.
#[derive(Clone, Default)]
pub struct EventRecorder {
    entries: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &Event) {
        self.entries.lock().push(event.clone());
    }

    /// Snapshot of the full timeline in occurrence order.
    pub fn timeline(&self) -> Vec<Event> {
        self.entries.lock().clone()
    }

    /// Every recorded transition for one vertex, in order.
    pub fn vertex_timeline(&self, vertex_id: &str) -> Vec<Event> {
        self.entries
            .lock()
            .iter()
            .filter(|event| event.vertex_id() == Some(vertex_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for EventRecorder {
    fn handle(&mut self, event: &Event) -> std::io::Result<()> {
        self.record(event);
        Ok(())
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("entries", &self.len())
            .finish()
    }
}
