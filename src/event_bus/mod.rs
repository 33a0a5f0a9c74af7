//! Event observation: the recorder log, fan-out bus, and sinks.
//!
//! The scheduler emits [`Event`]s through a [`RunEmitter`]; each event lands
//! synchronously in the run's [`EventRecorder`] timeline and, when a bus is
//! attached, is broadcast asynchronously to every [`EventSink`].

pub mod bus;
pub mod emitter;
pub mod event;
pub mod recorder;
pub mod sink;

pub use bus::EventBus;
pub use emitter::RunEmitter;
pub use event::{DiagnosticEvent, Event, RunEvent, RunEventKind, VertexEvent};
pub use recorder::EventRecorder;
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
