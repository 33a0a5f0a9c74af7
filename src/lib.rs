//! # Flowgraph: Flow Graph Execution Engine
//!
//! Flowgraph executes user-authored directed graphs of heterogeneous
//! computation nodes ("components") wired together by typed data edges. Each
//! run validates the graph, builds every vertex in dependency order with
//! bounded concurrency, resolves inline `@vertex.output.path` references
//! against upstream results, memoizes builds by input fingerprint, and
//! isolates failures to the affected branch.
//!
//! ## Core Concepts
//!
//! - **Graph**: insertion-ordered arena of vertices plus typed edges,
//!   validated for dangling endpoints, cycles, and unsatisfied inputs
//! - **Component**: a pluggable async unit of work with declared input and
//!   output ports, registered by type tag
//! - **Reference**: inline pointer from one vertex's raw parameter to
//!   another vertex's output, with `@@` escaping a literal `@`
//! - **Scheduler**: wavefront dispatch of ready vertices with failure and
//!   cancellation policies
//! - **Cache**: single-flight build memoization keyed by fingerprint
//! - **Events**: an ordered per-run timeline plus async fan-out to sinks
//!
//! ## Quick Start
//!
//! ```
//! use async_trait::async_trait;
//! use flowgraph::component::{
//!     BuildOutput, Component, ComponentError, ComponentRegistry, PortSpec, PortType,
//!     ResolvedParams,
//! };
//! use flowgraph::graph::{GraphBuilder, VertexDef};
//! use flowgraph::runner::FlowRunner;
//! use serde_json::{json, Value};
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl Component for Upper {
//!     fn inputs(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::required("input", PortType::Text)]
//!     }
//!     fn outputs(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::required("value", PortType::Text)]
//!     }
//!     async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
//!         let input = params
//!             .get("input")
//!             .and_then(Value::as_str)
//!             .ok_or(ComponentError::MissingParam { name: "input".into() })?;
//!         Ok(BuildOutput::new().with_output("value", json!(input.to_uppercase())))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let mut registry = ComponentRegistry::new();
//! registry.register("upper", || Upper);
//!
//! let graph = GraphBuilder::new()
//!     .add_vertex(VertexDef::new("up1", "upper").with_param("input", json!("hello")))
//!     .build()?;
//!
//! let mut runner = FlowRunner::new(graph, registry);
//! let result = runner.run().await?;
//! assert_eq!(result.output("up1", "value"), Some(&json!("HELLO")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Graph model, validation, and topological ordering
//! - [`component`] - The component contract and registry
//! - [`vertex`] - Per-vertex build pipeline and the shared run context
//! - [`resolver`] - The `@vertex.output.path` reference micro-language
//! - [`cache`] - Fingerprinted, single-flight build memoization
//! - [`scheduler`] - Wavefront dispatch, failure policies, cancellation
//! - [`runner`] - The high-level `run` surface and run results
//! - [`event_bus`] - Event recording and sink fan-out
//! - [`telemetry`] - Event formatting and tracing setup

pub mod cache;
pub mod component;
pub mod event_bus;
pub mod graph;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod vertex;
