//! Vertex build pipeline and per-run shared context.
//!
//! A [`Vertex`] is one node instance of the flow graph: the declaration from
//! [`crate::graph::VertexDef`] plus the concrete component the registry
//! attached to it. Its [`build`](Vertex::build) entry point resolves raw
//! parameters against upstream results, sanitizes them, consults the build
//! cache, invokes the component, and captures the outcome as an immutable
//! [`BuildResult`] whether the component succeeded or failed. Build errors
//! never escape as panics or early returns past the scheduler; they live on
//! the result so the rest of the run can proceed.
//!
//! [`RunContext`] is the publish side: the scheduler stores each finished
//! result there, and downstream reference resolution reads from it.

use crate::cache::{BuildCache, Fingerprint};
use crate::component::{Component, ComponentRegistry, ResolvedParams};
use crate::graph::VertexDef;
use crate::resolver::{self, ReferenceError, ReferenceSource};
use crate::types::BuildState;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building a single vertex.
///
/// These are captured into the vertex's [`BuildResult`], not propagated as a
/// run-level failure.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("no component implementation registered for `{component_type}` (vertex `{vertex}`)")]
    #[diagnostic(
        code(flowgraph::vertex::no_component_instance),
        help("Register the component type before running, or fix the vertex declaration.")
    )]
    NoComponentInstance {
        vertex: String,
        component_type: String,
    },

    #[error("component build failed for vertex `{vertex}`: {message}")]
    #[diagnostic(code(flowgraph::vertex::component_build))]
    ComponentBuild { vertex: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reference(#[from] ReferenceError),
}

/// Immutable record of one vertex's completed or failed build attempt.
#[derive(Clone, Debug, Serialize)]
pub struct BuildResult {
    pub vertex_id: String,
    /// Sanitized resolved-parameter snapshot; absent when resolution failed.
    pub resolved_params: Option<ResolvedParams>,
    pub valid: bool,
    pub outputs: FxHashMap<String, Value>,
    pub artifacts: Value,
    pub status: BuildState,
    pub error: Option<String>,
    /// Whether the outputs came from the build cache.
    pub cache_hit: bool,
}

impl BuildResult {
    #[must_use]
    pub fn built(
        vertex_id: impl Into<String>,
        resolved_params: ResolvedParams,
        outputs: FxHashMap<String, Value>,
        artifacts: Value,
        cache_hit: bool,
    ) -> Self {
        Self {
            vertex_id: vertex_id.into(),
            resolved_params: Some(resolved_params),
            valid: true,
            outputs,
            artifacts,
            status: BuildState::Built,
            error: None,
            cache_hit,
        }
    }

    #[must_use]
    pub fn failed(
        vertex_id: impl Into<String>,
        resolved_params: Option<ResolvedParams>,
        error: &BuildError,
    ) -> Self {
        Self {
            vertex_id: vertex_id.into(),
            resolved_params,
            valid: false,
            outputs: FxHashMap::default(),
            artifacts: Value::Null,
            status: BuildState::Failed,
            error: Some(error.to_string()),
            cache_hit: false,
        }
    }

    /// Record for a vertex that never ran, with the cause (an upstream
    /// failure or a cancellation) it was skipped for.
    #[must_use]
    pub fn skipped(vertex_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            vertex_id: vertex_id.into(),
            resolved_params: None,
            valid: false,
            outputs: FxHashMap::default(),
            artifacts: Value::Null,
            status: BuildState::Skipped,
            error: Some(cause.into()),
            cache_hit: false,
        }
    }

    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }
}

/// Strip values whose type is outside {string, number, boolean, list, map},
/// recursing into list elements and map entries. Applied to every resolved
/// parameter before it is fingerprinted, logged, or stored on a result.
#[must_use]
pub fn sanitize_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(sanitize_value).collect(),
        )),
        Value::Object(entries) => {
            let mut object = serde_json::Map::new();
            for (key, item) in entries {
                if let Some(kept) = sanitize_value(item) {
                    object.insert(key.clone(), kept);
                }
            }
            Some(Value::Object(object))
        }
        other => Some(other.clone()),
    }
}

fn sanitize_params(params: ResolvedParams) -> ResolvedParams {
    params
        .into_iter()
        .filter_map(|(name, value)| sanitize_value(&value).map(|v| (name, v)))
        .collect()
}

/// One node instance: declaration plus attached component implementation.
///
/// Immutable after construction; build state lives with the scheduler, which
/// is the sole writer of per-vertex state.
pub struct Vertex {
    pub id: String,
    pub component_type: String,
    pub raw_params: FxHashMap<String, Value>,
    component: Option<Arc<dyn Component>>,
}

impl Vertex {
    /// Instantiate the declared component type from the registry. A missing
    /// registration is not an error here; the vertex fails at build time
    /// instead, without aborting the whole run.
    #[must_use]
    pub fn from_def(def: &VertexDef, registry: &ComponentRegistry) -> Self {
        Self {
            id: def.id.clone(),
            component_type: def.component_type.clone(),
            raw_params: def.raw_params.clone(),
            component: registry.instantiate(&def.component_type),
        }
    }

    #[must_use]
    pub fn has_component(&self) -> bool {
        self.component.is_some()
    }

    /// Resolve raw parameters against already-built upstream results and
    /// strip non-serializable values.
    pub fn resolve_params(
        &self,
        sources: &dyn ReferenceSource,
    ) -> Result<ResolvedParams, ReferenceError> {
        let mut resolved = ResolvedParams::default();
        for (name, raw) in &self.raw_params {
            let parsed = resolver::parse(raw);
            resolved.insert(name.clone(), resolver::resolve(&parsed, sources)?);
        }
        Ok(sanitize_params(resolved))
    }

    /// Run the full build pipeline: resolve, fingerprint, consult the cache,
    /// invoke the component, assemble the result.
    ///
    /// Never returns an error; failures are captured on the returned
    /// [`BuildResult`] so one bad vertex cannot take down the run.
    pub async fn build(&self, sources: &dyn ReferenceSource, cache: &BuildCache) -> BuildResult {
        let resolved = match self.resolve_params(sources) {
            Ok(resolved) => resolved,
            Err(error) => {
                let error = BuildError::from(error);
                return BuildResult::failed(&self.id, None, &error);
            }
        };

        let Some(component) = self.component.as_deref() else {
            let error = BuildError::NoComponentInstance {
                vertex: self.id.clone(),
                component_type: self.component_type.clone(),
            };
            return BuildResult::failed(&self.id, Some(resolved), &error);
        };

        let fingerprint = Fingerprint::compute(&self.component_type, component.version(), &resolved);
        debug!(
            vertex = %self.id,
            component_type = %self.component_type,
            %fingerprint,
            "building vertex"
        );

        let outcome = cache
            .get_or_build(fingerprint, || component.build(&resolved))
            .await;
        match outcome {
            Ok(outcome) => BuildResult::built(
                &self.id,
                resolved,
                outcome.output.outputs.clone(),
                outcome.output.artifacts.clone(),
                outcome.hit,
            ),
            Err(error) => {
                let error = BuildError::ComponentBuild {
                    vertex: self.id.clone(),
                    message: error.to_string(),
                };
                BuildResult::failed(&self.id, Some(resolved), &error)
            }
        }
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("component_type", &self.component_type)
            .field("has_component", &self.component.is_some())
            .finish()
    }
}

/// Shared per-run result store.
///
/// The scheduler publishes each finished [`BuildResult`] here before marking
/// dependents ready, so a dispatched vertex always sees every upstream
/// result. Reads are lock-free-cheap; the only writer is the scheduler loop.
#[derive(Default)]
pub struct RunContext {
    results: RwLock<FxHashMap<String, Arc<BuildResult>>>,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: Arc<BuildResult>) {
        self.results
            .write()
            .insert(result.vertex_id.clone(), result);
    }

    /// Point query for one vertex's result, for progressive consumption
    /// while the run is still in flight.
    #[must_use]
    pub fn get(&self, vertex_id: &str) -> Option<Arc<BuildResult>> {
        self.results.read().get(vertex_id).cloned()
    }

    /// Snapshot of every published result, keyed by vertex id.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Arc<BuildResult>> {
        self.results.read().clone()
    }
}

impl ReferenceSource for RunContext {
    fn built_output(&self, vertex: &str, output: &str) -> Result<Value, ReferenceError> {
        let results = self.results.read();
        let result = results
            .get(vertex)
            .filter(|r| r.status.is_built())
            .ok_or_else(|| ReferenceError::NotBuilt {
                vertex: vertex.to_string(),
            })?;
        result
            .outputs
            .get(output)
            .cloned()
            .ok_or_else(|| ReferenceError::UnknownOutput {
                vertex: vertex.to_string(),
                output: output.to_string(),
            })
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("published", &self.results.read().len())
            .finish()
    }
}
