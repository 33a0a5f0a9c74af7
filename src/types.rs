//! Core types for the flowgraph execution engine.
//!
//! This module defines the fundamental vocabulary shared by the graph model,
//! the scheduler, and the runner: the per-vertex [`BuildState`] lifecycle,
//! the aggregate [`RunStatus`] of a run, and the [`FailurePolicy`] governing
//! what happens to the rest of the graph when one vertex fails.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph::types::{BuildState, RunStatus};
//!
//! let state = BuildState::Built;
//! assert!(state.is_terminal());
//! assert_eq!(state.to_string(), "built");
//!
//! let status = RunStatus::Completed;
//! assert!(status.is_success());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single vertex within a run.
///
/// A vertex starts `Pending`, moves through `Resolving` (reference
/// resolution) and `Building` (component invocation), and ends in exactly
/// one of the terminal states `Built`, `Failed`, or `Skipped`.
///
/// Only the scheduler task that owns a vertex's build may transition its
/// state; observers see transitions through the event log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Not yet dispatched; waiting on upstream dependencies.
    Pending,
    /// Dispatched; raw parameters are being resolved against upstream results.
    Resolving,
    /// Parameters resolved; the underlying component build is in progress.
    Building,
    /// Build completed successfully and outputs are published.
    Built,
    /// The build attempt failed; the error is captured on the vertex's result.
    Failed,
    /// Never built: an upstream failure or a cancellation removed it from the run.
    Skipped,
}

impl BuildState {
    /// Returns `true` once a vertex can no longer change state in this run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Built | Self::Failed | Self::Skipped)
    }

    /// Returns `true` if the vertex produced usable outputs.
    #[must_use]
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Building => "building",
            Self::Built => "built",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{label}")
    }
}

/// Aggregate outcome of one run over a whole graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every vertex reached `Built`.
    Completed,
    /// At least one vertex failed; the rest of the graph ran per the
    /// configured [`FailurePolicy`].
    Failed,
    /// An external cancellation request ended the run early.
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// What the scheduler does with the rest of the graph after a vertex fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Mark the transitive downstream closure of the failed vertex `Skipped`
    /// and let independent branches run to completion.
    #[default]
    SkipDownstream,
    /// Mark every undispatched vertex `Skipped` on the first failure; builds
    /// already in flight are allowed to finish.
    StopOnFirstError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!BuildState::Pending.is_terminal());
        assert!(!BuildState::Resolving.is_terminal());
        assert!(!BuildState::Building.is_terminal());
        assert!(BuildState::Built.is_terminal());
        assert!(BuildState::Failed.is_terminal());
        assert!(BuildState::Skipped.is_terminal());
    }

    #[test]
    fn display_labels_are_stable() {
        assert_eq!(BuildState::Skipped.to_string(), "skipped");
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&BuildState::Built).unwrap();
        assert_eq!(json, "\"built\"");
        let back: BuildState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BuildState::Built);
    }
}
