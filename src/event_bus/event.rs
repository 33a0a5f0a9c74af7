use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{BuildState, RunStatus};

/// A structured observation of engine activity: a vertex state transition, a
/// run lifecycle change, or a free-form diagnostic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Vertex(VertexEvent),
    Run(RunEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn vertex_transition(
        run_id: impl Into<String>,
        vertex_id: impl Into<String>,
        state: BuildState,
    ) -> Self {
        Event::Vertex(VertexEvent::new(run_id, vertex_id, state, None))
    }

    pub fn vertex_transition_with_detail(
        run_id: impl Into<String>,
        vertex_id: impl Into<String>,
        state: BuildState,
        detail: impl Into<String>,
    ) -> Self {
        Event::Vertex(VertexEvent::new(run_id, vertex_id, state, Some(detail.into())))
    }

    pub fn run_started(run_id: impl Into<String>) -> Self {
        Event::Run(RunEvent::new(run_id, RunEventKind::Started))
    }

    pub fn run_finished(run_id: impl Into<String>, status: RunStatus) -> Self {
        Event::Run(RunEvent::new(run_id, RunEventKind::Finished { status }))
    }

    pub fn cancellation_requested(run_id: impl Into<String>) -> Self {
        Event::Run(RunEvent::new(run_id, RunEventKind::CancellationRequested))
    }

    pub fn graph_mutated(run_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Event::Run(RunEvent::new(
            run_id,
            RunEventKind::GraphMutated {
                detail: detail.into(),
            },
        ))
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// The vertex this event concerns, if it is a vertex transition.
    pub fn vertex_id(&self) -> Option<&str> {
        match self {
            Event::Vertex(event) => Some(&event.vertex_id),
            _ => None,
        }
    }

    /// The build state this event reports, if it is a vertex transition.
    pub fn build_state(&self) -> Option<BuildState> {
        match self {
            Event::Vertex(event) => Some(event.state),
            _ => None,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Event::Vertex(event) => Some(&event.run_id),
            Event::Run(event) => Some(&event.run_id),
            Event::Diagnostic(_) => None,
        }
    }

    /// Structured JSON with a normalized schema, for streaming consumers.
    pub fn to_json_value(&self) -> Value {
        match self {
            Event::Vertex(event) => json!({
                "type": "vertex",
                "run_id": event.run_id,
                "vertex_id": event.vertex_id,
                "state": event.state,
                "detail": event.detail,
                "timestamp": event.timestamp.to_rfc3339(),
            }),
            Event::Run(event) => json!({
                "type": "run",
                "run_id": event.run_id,
                "kind": event.kind,
                "timestamp": event.timestamp.to_rfc3339(),
            }),
            Event::Diagnostic(event) => json!({
                "type": "diagnostic",
                "scope": event.scope,
                "message": event.message,
            }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Vertex(event) => {
                write!(
                    f,
                    "[{}] vertex {} -> {}",
                    event.run_id, event.vertex_id, event.state
                )?;
                if let Some(detail) = &event.detail {
                    write!(f, " ({detail})")?;
                }
                Ok(())
            }
            Event::Run(event) => match &event.kind {
                RunEventKind::Started => write!(f, "[{}] run started", event.run_id),
                RunEventKind::Finished { status } => {
                    write!(f, "[{}] run finished: {status:?}", event.run_id)
                }
                RunEventKind::CancellationRequested => {
                    write!(f, "[{}] cancellation requested", event.run_id)
                }
                RunEventKind::GraphMutated { detail } => {
                    write!(f, "[{}] graph mutated: {detail}", event.run_id)
                }
            },
            Event::Diagnostic(event) => write!(f, "{}: {}", event.scope, event.message),
        }
    }
}

/// One vertex's build state changed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VertexEvent {
    pub run_id: String,
    pub vertex_id: String,
    pub state: BuildState,
    /// Optional context, such as a failure message or skip cause.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl VertexEvent {
    pub fn new(
        run_id: impl Into<String>,
        vertex_id: impl Into<String>,
        state: BuildState,
        detail: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            vertex_id: vertex_id.into(),
            state,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Run-level lifecycle changes, including graph mutations between runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Started,
    Finished { status: RunStatus },
    CancellationRequested,
    GraphMutated { detail: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunEvent {
    pub run_id: String,
    pub kind: RunEventKind,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Free-form engine diagnostics that are not tied to one vertex.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}
