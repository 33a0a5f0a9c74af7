//! Run orchestration: validate, schedule, and report.
//!
//! [`FlowRunner`] owns a [`FlowGraph`] and a [`ComponentRegistry`], carries a
//! [`BuildCache`] across runs, and exposes the `run` family. Each run
//! validates the graph (aborting with zero side effects on a malformed
//! graph), applies any per-run parameter overrides, drives the scheduler,
//! and returns a [`RunResult`] describing every vertex's fate together with
//! the ordered event timeline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use flowgraph::component::ComponentRegistry;
//! use flowgraph::graph::{GraphBuilder, VertexDef};
//! use flowgraph::runner::{FlowRunner, RunnerConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> miette::Result<()> {
//! let graph = GraphBuilder::new()
//!     .add_vertex(VertexDef::new("in1", "text_input").with_param("value", json!("hello")))
//!     .build()?;
//! let registry = ComponentRegistry::new();
//!
//! let mut runner = FlowRunner::with_config(graph, registry, RunnerConfig::default());
//! let result = runner.run().await?;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::cache::BuildCache;
use crate::component::ComponentRegistry;
use crate::event_bus::{ChannelSink, Event, EventBus, EventRecorder, RunEmitter};
use crate::graph::{FlowGraph, GraphError};
use crate::scheduler::{CancelToken, Scheduler, SchedulerOptions};
use crate::types::{FailurePolicy, RunStatus};
use crate::utils::new_run_id;
use crate::vertex::{BuildResult, RunContext, Vertex};

/// Tunables shared by every run of one [`FlowRunner`].
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Upper bound on concurrently building vertices.
    pub max_in_flight: usize,
    pub failure_policy: FailurePolicy,
    /// Grace period granted to in-flight builds after cancellation.
    pub grace_period: Duration,
    /// Cache entry lifetime; `None` keeps entries until the runner drops.
    pub cache_ttl: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            failure_policy: FailurePolicy::default(),
            grace_period: Duration::from_secs(5),
            cache_ttl: None,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = Some(cache_ttl);
        self
    }
}

/// Per-run raw parameter overrides, keyed by vertex id then parameter name.
///
/// Overrides replace the declared raw value before reference resolution, so
/// they may themselves contain references.
#[derive(Clone, Debug, Default)]
pub struct ParamOverrides {
    entries: FxHashMap<String, FxHashMap<String, Value>>,
}

impl ParamOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(
        mut self,
        vertex_id: impl Into<String>,
        param: impl Into<String>,
        value: Value,
    ) -> Self {
        self.entries
            .entry(vertex_id.into())
            .or_default()
            .insert(param.into(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Aggregate outcome of one run.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// Every vertex's build or failure record, keyed by vertex id.
    pub results: FxHashMap<String, Arc<BuildResult>>,
    /// Ordered event timeline for replay and inspection.
    pub timeline: Vec<Event>,
}

impl RunResult {
    /// Point query for one vertex's result.
    #[must_use]
    pub fn result(&self, vertex_id: &str) -> Option<&Arc<BuildResult>> {
        self.results.get(vertex_id)
    }

    /// Shortcut to one output value of one vertex.
    #[must_use]
    pub fn output(&self, vertex_id: &str, output: &str) -> Option<&Value> {
        self.results.get(vertex_id)?.output(output)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Executes a flow graph, once per `run` call, against a component registry.
pub struct FlowRunner {
    graph: FlowGraph,
    registry: ComponentRegistry,
    config: RunnerConfig,
    cache: Arc<BuildCache>,
    event_bus: Option<EventBus>,
    graph_dirty: bool,
}

impl FlowRunner {
    #[must_use]
    pub fn new(graph: FlowGraph, registry: ComponentRegistry) -> Self {
        Self::with_config(graph, registry, RunnerConfig::default())
    }

    #[must_use]
    pub fn with_config(graph: FlowGraph, registry: ComponentRegistry, config: RunnerConfig) -> Self {
        let cache = match config.cache_ttl {
            Some(ttl) => BuildCache::with_ttl(ttl),
            None => BuildCache::new(),
        };
        Self {
            graph,
            registry,
            config,
            cache: Arc::new(cache),
            event_bus: None,
            graph_dirty: false,
        }
    }

    /// Share one [`BuildCache`] across several runners, so concurrent runs
    /// of graphs with overlapping fingerprints still build each fingerprint
    /// at most once.
    #[must_use]
    pub fn with_shared_cache(
        graph: FlowGraph,
        registry: ComponentRegistry,
        config: RunnerConfig,
        cache: Arc<BuildCache>,
    ) -> Self {
        Self {
            graph,
            registry,
            config,
            cache,
            event_bus: None,
            graph_dirty: false,
        }
    }

    /// Attach an event bus; its sinks receive every event of every
    /// subsequent run. The listener starts on the first run.
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Mutable access for editing the graph between runs. The next run
    /// re-validates and recomputes adjacency.
    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        self.graph_dirty = true;
        &mut self.graph
    }

    #[must_use]
    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Subscribe a streaming consumer. Events of subsequent runs are
    /// forwarded over the returned channel as they occur; requires an
    /// attached event bus.
    pub fn subscribe_events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        let bus = self.event_bus.as_ref()?;
        let (tx, rx) = mpsc::unbounded_channel();
        bus.add_sink(ChannelSink::new(tx));
        Some(rx)
    }

    /// Run the graph with no overrides and no external cancellation.
    pub async fn run(&mut self) -> Result<RunResult, GraphError> {
        self.run_with(ParamOverrides::default(), CancelToken::new())
            .await
    }

    /// Run the graph with per-run parameter overrides.
    pub async fn run_with_overrides(
        &mut self,
        overrides: ParamOverrides,
    ) -> Result<RunResult, GraphError> {
        self.run_with(overrides, CancelToken::new()).await
    }

    /// Run the graph with overrides and an externally held cancel token.
    #[instrument(skip(self, overrides, cancel), err)]
    pub async fn run_with(
        &mut self,
        overrides: ParamOverrides,
        cancel: CancelToken,
    ) -> Result<RunResult, GraphError> {
        // Overrides apply to a per-run copy, so the declared graph is
        // untouched and validation failures abort with no state changed.
        let mut graph = self.graph.clone();
        for (vertex_id, params) in &overrides.entries {
            for (name, value) in params {
                graph.set_raw_param(vertex_id, name, value.clone())?;
            }
        }
        graph.validate(&self.registry)?;
        let adjacency = graph.ensure_adjacency().clone();

        let vertices: Vec<Arc<Vertex>> = graph
            .vertices()
            .map(|def| Arc::new(Vertex::from_def(def, &self.registry)))
            .collect();

        let run_id = new_run_id();
        let recorder = EventRecorder::new();
        let sender = self.event_bus.as_ref().map(|bus| {
            bus.listen_for_events();
            bus.get_sender()
        });
        let emitter = RunEmitter::new(recorder.clone(), sender);

        info!(%run_id, vertices = vertices.len(), "starting run");
        emitter.emit(Event::run_started(&run_id));
        if std::mem::take(&mut self.graph_dirty) {
            emitter.emit(Event::graph_mutated(
                &run_id,
                "graph edited since previous run; revalidated",
            ));
        }

        let ctx = Arc::new(RunContext::new());
        let scheduler = Scheduler::new(
            &run_id,
            vertices,
            adjacency,
            SchedulerOptions {
                max_in_flight: self.config.max_in_flight,
                failure_policy: self.config.failure_policy,
                grace_period: self.config.grace_period,
            },
            Arc::clone(&ctx),
            Arc::clone(&self.cache),
            emitter.clone(),
            cancel,
        );
        let status = scheduler.run().await;
        emitter.emit(Event::run_finished(&run_id, status));

        Ok(RunResult {
            run_id,
            status,
            results: ctx.snapshot(),
            timeline: recorder.timeline(),
        })
    }

    /// Stop the attached bus's listener task, flushing nothing further.
    pub async fn shutdown(&self) {
        if let Some(bus) = &self.event_bus {
            bus.stop_listener().await;
        }
    }
}

impl std::fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRunner")
            .field("vertices", &self.graph.len())
            .field("config", &self.config)
            .field("has_event_bus", &self.event_bus.is_some())
            .finish()
    }
}
