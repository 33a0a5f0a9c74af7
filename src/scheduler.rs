//! Wavefront build scheduler.
//!
//! The scheduler keeps a ready queue of vertices whose every dependency is
//! already Built and dispatches from it continuously, re-evaluating
//! readiness after each completion rather than running level-synchronous
//! passes. Independent branches therefore overlap freely, bounded only by
//! the configured in-flight limit.
//!
//! State discipline: the scheduler loop is the single writer of per-vertex
//! build state. Spawned build tasks compute a [`BuildResult`] and hand it
//! back over the join set; the loop publishes it to the shared
//! [`RunContext`] before any dependent becomes ready, so a dispatched vertex
//! always observes its upstream results. Builds never hold a scheduler-wide
//! lock while suspended on component I/O.
//!
//! Failure semantics follow the configured [`FailurePolicy`]: by default a
//! failed vertex drags its transitive downstream closure to Skipped while
//! siblings continue; stop-on-first-error additionally skips everything not
//! yet dispatched and lets in-flight builds finish. Cancellation is
//! cooperative: the token is checked before every dispatch, undispatched
//! vertices are skipped immediately, and in-flight builds get a bounded
//! grace period before being aborted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cache::BuildCache;
use crate::event_bus::{Event, RunEmitter};
use crate::graph::Adjacency;
use crate::types::{BuildState, FailurePolicy, RunStatus};
use crate::vertex::{BuildError, BuildResult, RunContext, Vertex};

/// Cloneable cooperative cancellation handle.
///
/// Cancelling is idempotent and observable from every clone.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Idempotent; takes effect even when no run has subscribed yet, so a
    /// token can be cancelled before being handed to a run.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs for one scheduled run.
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    /// Upper bound on concurrently building vertices.
    pub max_in_flight: usize,
    pub failure_policy: FailurePolicy,
    /// How long in-flight builds may keep running after cancellation.
    pub grace_period: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            failure_policy: FailurePolicy::default(),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Drives one run of a validated graph to completion.
pub struct Scheduler {
    run_id: String,
    vertices: Vec<Arc<Vertex>>,
    adjacency: Adjacency,
    options: SchedulerOptions,
    ctx: Arc<RunContext>,
    cache: Arc<BuildCache>,
    emitter: RunEmitter,
    cancel: CancelToken,

    states: Vec<BuildState>,
    /// Unbuilt-dependency count per vertex; a vertex is ready at zero.
    remaining: Vec<usize>,
}

impl Scheduler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        vertices: Vec<Arc<Vertex>>,
        adjacency: Adjacency,
        options: SchedulerOptions,
        ctx: Arc<RunContext>,
        cache: Arc<BuildCache>,
        emitter: RunEmitter,
        cancel: CancelToken,
    ) -> Self {
        let states = vec![BuildState::Pending; vertices.len()];
        let remaining = adjacency.in_degree.clone();
        Self {
            run_id: run_id.into(),
            vertices,
            adjacency,
            options,
            ctx,
            cache,
            emitter,
            cancel,
            states,
            remaining,
        }
    }

    /// Execute the run and report its overall status.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(mut self) -> RunStatus {
        let max_in_flight = self.options.max_in_flight.max(1);
        let mut ready: VecDeque<usize> = (0..self.vertices.len())
            .filter(|&i| self.remaining[i] == 0)
            .collect();
        let mut join_set: JoinSet<(usize, BuildResult)> = JoinSet::new();
        let mut cancel_rx = self.cancel.subscribe();

        let mut any_failure = false;
        let mut cancelled = false;
        let mut stop_dispatch = false;
        let mut watch_alive = true;

        loop {
            while !stop_dispatch && join_set.len() < max_in_flight {
                // Cooperative cancellation check before each dispatch.
                if self.cancel.is_cancelled() {
                    break;
                }
                let Some(index) = ready.pop_front() else {
                    break;
                };
                self.dispatch(index, &mut join_set);
            }

            if self.cancel.is_cancelled() && !cancelled {
                cancelled = true;
                stop_dispatch = true;
                self.emitter
                    .emit(Event::cancellation_requested(&self.run_id));
                self.skip_all_pending("run cancelled");
                ready.clear();
            }

            if join_set.is_empty() {
                if cancelled || stop_dispatch || ready.is_empty() {
                    break;
                }
                continue;
            }

            tokio::select! {
                joined = join_set.join_next() => {
                    if let Some(joined) = joined {
                        match joined {
                            Ok((index, result)) => {
                                let failed = self.complete(index, result, &mut ready);
                                if failed {
                                    any_failure = true;
                                    match self.options.failure_policy {
                                        FailurePolicy::SkipDownstream => {
                                            self.skip_downstream(index, &mut ready);
                                        }
                                        FailurePolicy::StopOnFirstError => {
                                            stop_dispatch = true;
                                            let cause = format!(
                                                "run stopped after vertex `{}` failed",
                                                self.vertices[index].id
                                            );
                                            self.skip_all_pending(&cause);
                                            ready.clear();
                                        }
                                    }
                                }
                            }
                            Err(join_error) => {
                                warn!(error = %join_error, "build task aborted unexpectedly");
                            }
                        }
                    }
                }
                changed = cancel_rx.changed(), if !cancelled && watch_alive => {
                    // A dropped sender can't happen while `self.cancel`
                    // holds it, but disable the branch anyway so the select
                    // cannot spin on a closed channel.
                    if changed.is_err() {
                        watch_alive = false;
                    }
                    // Cancellation itself is handled at the top of the loop.
                }
            }
        }

        if cancelled {
            self.drain_with_grace(join_set).await;
        }

        // A validated DAG leaves nothing pending, but an inconsistent graph
        // must still yield a result for every vertex.
        self.skip_all_pending("dependency was never built");

        let status = if cancelled {
            RunStatus::Cancelled
        } else if any_failure {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        info!(run_id = %self.run_id, ?status, "run finished");
        status
    }

    fn dispatch(&mut self, index: usize, join_set: &mut JoinSet<(usize, BuildResult)>) {
        self.states[index] = BuildState::Resolving;
        self.emitter.emit(Event::vertex_transition(
            &self.run_id,
            &self.vertices[index].id,
            BuildState::Resolving,
        ));

        let vertex = Arc::clone(&self.vertices[index]);
        let ctx = Arc::clone(&self.ctx);
        let cache = Arc::clone(&self.cache);
        let emitter = self.emitter.clone();
        let run_id = self.run_id.clone();

        join_set.spawn(async move {
            emitter.emit(Event::vertex_transition(
                &run_id,
                &vertex.id,
                BuildState::Building,
            ));
            let result = std::panic::AssertUnwindSafe(vertex.build(ctx.as_ref(), &cache))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    // Keep the panic text so the failure names its cause.
                    let text = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned());
                    let error = BuildError::ComponentBuild {
                        vertex: vertex.id.clone(),
                        message: match text {
                            Some(text) => format!("component panicked: {text}"),
                            None => "component panicked".into(),
                        },
                    };
                    BuildResult::failed(&vertex.id, None, &error)
                });
            (index, result)
        });
    }

    /// Record a finished build: publish the result, transition the vertex,
    /// and on success release dependents into the ready queue. Returns
    /// whether the vertex failed.
    fn complete(&mut self, index: usize, result: BuildResult, ready: &mut VecDeque<usize>) -> bool {
        let status = result.status;
        let detail = result.error.clone();
        debug!(
            vertex = %self.vertices[index].id,
            state = %status,
            cache_hit = result.cache_hit,
            "vertex finished"
        );

        // Publish before releasing dependents so a newly ready vertex always
        // sees this result.
        self.ctx.publish(Arc::new(result));
        self.states[index] = status;
        self.emit_transition(index, status, detail);

        if status.is_built() {
            for &dependent in &self.adjacency.dependents[index] {
                self.remaining[dependent] -= 1;
                if self.remaining[dependent] == 0 && self.states[dependent] == BuildState::Pending {
                    ready.push_back(dependent);
                }
            }
            false
        } else {
            true
        }
    }

    /// Mark the transitive downstream closure of a failed vertex Skipped,
    /// each with a cause naming the originating failure.
    fn skip_downstream(&mut self, failed: usize, ready: &mut VecDeque<usize>) {
        let cause = format!("upstream vertex `{}` failed", self.vertices[failed].id);
        let mut stack: Vec<usize> = self.adjacency.dependents[failed].clone();
        while let Some(index) = stack.pop() {
            if self.states[index] != BuildState::Pending {
                continue;
            }
            self.skip(index, &cause);
            ready.retain(|&r| r != index);
            stack.extend_from_slice(&self.adjacency.dependents[index]);
        }
    }

    fn skip_all_pending(&mut self, cause: &str) {
        for index in 0..self.vertices.len() {
            if self.states[index] == BuildState::Pending {
                self.skip(index, cause);
            }
        }
    }

    fn skip(&mut self, index: usize, cause: &str) {
        self.states[index] = BuildState::Skipped;
        self.ctx
            .publish(Arc::new(BuildResult::skipped(&self.vertices[index].id, cause)));
        self.emit_transition(index, BuildState::Skipped, Some(cause.to_string()));
    }

    fn emit_transition(&self, index: usize, state: BuildState, detail: Option<String>) {
        let event = match detail {
            Some(detail) => Event::vertex_transition_with_detail(
                &self.run_id,
                &self.vertices[index].id,
                state,
                detail,
            ),
            None => Event::vertex_transition(&self.run_id, &self.vertices[index].id, state),
        };
        self.emitter.emit(event);
    }

    /// After cancellation, let in-flight builds finish within the grace
    /// period; whatever is still running afterwards is aborted and its
    /// vertex marked Skipped.
    async fn drain_with_grace(&mut self, mut join_set: JoinSet<(usize, BuildResult)>) {
        let deadline = Instant::now() + self.options.grace_period;
        let mut ready = VecDeque::new();

        while !join_set.is_empty() {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    // Downstream is already skipped by cancellation, so the
                    // failure flag needs no handling here.
                    self.complete(index, result, &mut ready);
                }
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "build task aborted during drain");
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    warn!(
                        run_id = %self.run_id,
                        "grace period expired; aborting in-flight builds"
                    );
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        // Vertices whose builds were aborted never produced a result.
        for index in 0..self.vertices.len() {
            if !self.states[index].is_terminal() {
                self.skip(index, "cancelled before completion");
            }
        }
    }
}
