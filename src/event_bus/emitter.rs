use super::event::Event;
use super::recorder::EventRecorder;
use tracing::trace;

/// Emission handle the scheduler holds for one run.
///
/// Every event is recorded synchronously into the run's [`EventRecorder`]
/// (so the timeline is complete and ordered even if no bus is attached) and
/// then forwarded to the bus sender, if any, for async fan-out to sinks.
/// Emission never fails and never blocks the scheduler.
#[derive(Clone)]
pub struct RunEmitter {
    recorder: EventRecorder,
    sender: Option<flume::Sender<Event>>,
}

impl RunEmitter {
    pub fn new(recorder: EventRecorder, sender: Option<flume::Sender<Event>>) -> Self {
        Self { recorder, sender }
    }

    /// Recorder-only emitter, for runs with no streaming consumers.
    pub fn recording_only(recorder: EventRecorder) -> Self {
        Self {
            recorder,
            sender: None,
        }
    }

    pub fn emit(&self, event: Event) {
        self.recorder.record(&event);
        if let Some(sender) = &self.sender
            && sender.send(event).is_err()
        {
            trace!("event bus receiver dropped; continuing without fan-out");
        }
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }
}

impl std::fmt::Debug for RunEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEmitter")
            .field("recorded", &self.recorder.len())
            .field("has_bus", &self.sender.is_some())
            .finish()
    }
}
