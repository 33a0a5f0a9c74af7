//! Flow graph model: vertices, edges, validation, and build order.
//!
//! A [`FlowGraph`] exclusively owns its vertices and edges in an
//! insertion-ordered arena, referenced by id. Derived adjacency (forward
//! dependents, backward dependencies) is recomputed lazily and invalidated by
//! every mutation, so a graph edited between runs re-validates before the
//! next build.
//!
//! Construction goes through [`GraphBuilder`], which runs structural
//! validation (duplicate ids, dangling edge endpoints, self-loops, cycles)
//! before handing out a graph. Port-level validation against a component
//! registry happens at run time, when concrete component implementations are
//! available.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph::graph::{GraphBuilder, VertexDef};
//! use serde_json::json;
//!
//! let graph = GraphBuilder::new()
//!     .add_vertex(VertexDef::new("in1", "text_input").with_param("value", json!("hello")))
//!     .add_vertex(VertexDef::new("up1", "upper").with_param("input", json!("@in1.value")))
//!     .add_edge("in1", "value", "up1", "input")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(graph.sort_components().unwrap(), vec!["in1", "up1"]);
//! ```

use crate::component::{ComponentRegistry, PortSpec};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Declaration of one vertex: an id, the component type it instantiates, and
/// its raw (possibly reference-bearing) parameter values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexDef {
    pub id: String,
    pub component_type: String,
    #[serde(default)]
    pub raw_params: FxHashMap<String, Value>,
}

impl VertexDef {
    #[must_use]
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            raw_params: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.raw_params.insert(name.into(), value);
        self
    }
}

/// Directed dependency from one vertex's output port to another's input port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub source_output: String,
    pub target: String,
    pub target_input: String,
}

impl Edge {
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_output: source_output.into(),
            target: target.into(),
            target_input: target_input.into(),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_output, self.target, self.target_input
        )
    }
}

/// Errors raised by graph construction, mutation, and validation.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate vertex id `{id}`")]
    #[diagnostic(code(flowgraph::graph::duplicate_vertex))]
    DuplicateVertex { id: String },

    #[error("edge `{edge}` references unknown vertex `{vertex}`")]
    #[diagnostic(
        code(flowgraph::graph::dangling_edge),
        help("Every edge endpoint must name a vertex declared in the graph.")
    )]
    DanglingEdge { edge: String, vertex: String },

    #[error("vertex `{vertex}` has an edge to itself")]
    #[diagnostic(code(flowgraph::graph::self_loop))]
    SelfLoop { vertex: String },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(flowgraph::graph::cycle),
        help("Builds run in dependency order; break the cycle by removing one of its edges.")
    )]
    CycleDetected { cycle: Vec<String> },

    #[error("vertex `{vertex}` ({component_type}) declares no output named `{port}`")]
    #[diagnostic(code(flowgraph::graph::unknown_output_port))]
    UnknownOutputPort {
        vertex: String,
        component_type: String,
        port: String,
    },

    #[error("vertex `{vertex}` ({component_type}) declares no input named `{port}`")]
    #[diagnostic(code(flowgraph::graph::unknown_input_port))]
    UnknownInputPort {
        vertex: String,
        component_type: String,
        port: String,
    },

    #[error("required input `{input}` of vertex `{vertex}` is unsatisfied")]
    #[diagnostic(
        code(flowgraph::graph::unsatisfied_input),
        help("Provide the input via an incoming edge or a literal raw parameter.")
    )]
    UnsatisfiedInput { vertex: String, input: String },

    #[error("unknown vertex `{id}`")]
    #[diagnostic(code(flowgraph::graph::unknown_vertex))]
    UnknownVertex { id: String },

    #[error("graph has no vertices")]
    #[diagnostic(code(flowgraph::graph::empty))]
    EmptyGraph,
}

/// Derived readiness structure over arena indices.
///
/// Recomputed by [`FlowGraph::ensure_adjacency`] after any mutation.
#[derive(Clone, Debug, Default)]
pub struct Adjacency {
    /// For each vertex index, the indices that depend on it.
    pub dependents: Vec<Vec<usize>>,
    /// For each vertex index, the indices it depends on.
    pub dependencies: Vec<Vec<usize>>,
    /// Incoming-edge-source count per vertex (distinct dependency vertices).
    pub in_degree: Vec<usize>,
}

/// An insertion-ordered arena of vertices plus the edges wiring them.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    vertices: Vec<VertexDef>,
    index: FxHashMap<String, usize>,
    edges: Vec<Edge>,
    adjacency: Option<Adjacency>,
}

impl FlowGraph {
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn vertex(&self, id: &str) -> Option<&VertexDef> {
        self.index.get(id).map(|&i| &self.vertices[i])
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn vertex_at(&self, index: usize) -> &VertexDef {
        &self.vertices[index]
    }

    pub fn vertices(&self) -> impl Iterator<Item = &VertexDef> {
        self.vertices.iter()
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add a vertex after construction. Invalidates derived adjacency.
    pub fn add_vertex(&mut self, vertex: VertexDef) -> Result<(), GraphError> {
        if self.index.contains_key(&vertex.id) {
            return Err(GraphError::DuplicateVertex { id: vertex.id });
        }
        self.index.insert(vertex.id.clone(), self.vertices.len());
        self.vertices.push(vertex);
        self.adjacency = None;
        Ok(())
    }

    /// Add an edge after construction. Invalidates derived adjacency.
    ///
    /// Endpoint existence is checked immediately; cycle checking waits for
    /// the next validation pass.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.index.contains_key(endpoint) {
                return Err(GraphError::DanglingEdge {
                    edge: edge.to_string(),
                    vertex: endpoint.clone(),
                });
            }
        }
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop {
                vertex: edge.source,
            });
        }
        self.edges.push(edge);
        self.adjacency = None;
        Ok(())
    }

    /// Remove a vertex and every edge touching it. Invalidates adjacency.
    pub fn remove_vertex(&mut self, id: &str) -> Result<VertexDef, GraphError> {
        let position = self
            .index_of(id)
            .ok_or_else(|| GraphError::UnknownVertex { id: id.to_string() })?;
        let removed = self.vertices.remove(position);
        self.edges.retain(|e| e.source != id && e.target != id);
        self.index.clear();
        for (i, vertex) in self.vertices.iter().enumerate() {
            self.index.insert(vertex.id.clone(), i);
        }
        self.adjacency = None;
        Ok(removed)
    }

    /// Replace one raw parameter value. Adjacency is unaffected, but
    /// required-input satisfaction is rechecked at the next validation.
    pub fn set_raw_param(
        &mut self,
        vertex_id: &str,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), GraphError> {
        let index = self.index_of(vertex_id).ok_or_else(|| GraphError::UnknownVertex {
            id: vertex_id.to_string(),
        })?;
        self.vertices[index].raw_params.insert(name.into(), value);
        Ok(())
    }

    /// Remove one edge by its endpoints. Invalidates adjacency.
    pub fn remove_edge(&mut self, edge: &Edge) -> Result<(), GraphError> {
        let before = self.edges.len();
        self.edges.retain(|e| e != edge);
        if self.edges.len() == before {
            return Err(GraphError::DanglingEdge {
                edge: edge.to_string(),
                vertex: edge.source.clone(),
            });
        }
        self.adjacency = None;
        Ok(())
    }

    /// Recompute adjacency if a mutation invalidated it, then return it.
    pub fn ensure_adjacency(&mut self) -> &Adjacency {
        if self.adjacency.is_none() {
            self.adjacency = Some(self.compute_adjacency());
        }
        self.adjacency
            .as_ref()
            .unwrap_or_else(|| unreachable!("adjacency populated above"))
    }

    fn compute_adjacency(&self) -> Adjacency {
        let n = self.vertices.len();
        let mut dependents = vec![Vec::new(); n];
        let mut dependencies = vec![Vec::new(); n];
        for edge in &self.edges {
            let (Some(source), Some(target)) =
                (self.index_of(&edge.source), self.index_of(&edge.target))
            else {
                continue;
            };
            // Parallel edges between the same pair count once for readiness.
            if !dependents[source].contains(&target) {
                dependents[source].push(target);
                dependencies[target].push(source);
            }
        }
        let in_degree = dependencies.iter().map(Vec::len).collect();
        Adjacency {
            dependents,
            dependencies,
            in_degree,
        }
    }

    /// Structural validation: dangling endpoints, self-loops, cycles.
    pub fn validate_structure(&self) -> Result<(), GraphError> {
        if self.vertices.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !self.index.contains_key(endpoint) {
                    return Err(GraphError::DanglingEdge {
                        edge: edge.to_string(),
                        vertex: endpoint.clone(),
                    });
                }
            }
            if edge.source == edge.target {
                return Err(GraphError::SelfLoop {
                    vertex: edge.source.clone(),
                });
            }
        }
        self.detect_cycle()
    }

    /// Port-level validation against concrete component declarations.
    ///
    /// Edges must land on declared output/input ports, and every required
    /// input must be fed by an incoming edge or a literal raw parameter.
    /// Vertices whose component type is absent from the registry are skipped
    /// here; they fail at build time instead, without aborting the run.
    pub fn validate_ports(&self, registry: &ComponentRegistry) -> Result<(), GraphError> {
        let mut declared: FxHashMap<usize, (Vec<PortSpec>, Vec<PortSpec>)> = FxHashMap::default();
        for (i, vertex) in self.vertices.iter().enumerate() {
            if let Some(component) = registry.instantiate(&vertex.component_type) {
                declared.insert(i, (component.inputs(), component.outputs()));
            }
        }

        for edge in &self.edges {
            if let Some(source) = self.index_of(&edge.source)
                && let Some((_, outputs)) = declared.get(&source)
                && !outputs.iter().any(|p| p.name == edge.source_output)
            {
                return Err(GraphError::UnknownOutputPort {
                    vertex: edge.source.clone(),
                    component_type: self.vertices[source].component_type.clone(),
                    port: edge.source_output.clone(),
                });
            }
            if let Some(target) = self.index_of(&edge.target)
                && let Some((inputs, _)) = declared.get(&target)
                && !inputs.iter().any(|p| p.name == edge.target_input)
            {
                return Err(GraphError::UnknownInputPort {
                    vertex: edge.target.clone(),
                    component_type: self.vertices[target].component_type.clone(),
                    port: edge.target_input.clone(),
                });
            }
        }

        for (i, vertex) in self.vertices.iter().enumerate() {
            let Some((inputs, _)) = declared.get(&i) else {
                continue;
            };
            for input in inputs.iter().filter(|p| p.required) {
                let fed_by_edge = self
                    .edges
                    .iter()
                    .any(|e| e.target == vertex.id && e.target_input == input.name);
                let fed_by_literal = vertex.raw_params.contains_key(&input.name);
                if !fed_by_edge && !fed_by_literal {
                    return Err(GraphError::UnsatisfiedInput {
                        vertex: vertex.id.clone(),
                        input: input.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Full validation pass run before scheduling.
    pub fn validate(&self, registry: &ComponentRegistry) -> Result<(), GraphError> {
        self.validate_structure()?;
        self.validate_ports(registry)
    }

    /// DFS with white/gray/black coloring over arena indices. On detection,
    /// names the cycle's vertices in traversal order.
    fn detect_cycle(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let adjacency = self.compute_adjacency();
        let n = self.vertices.len();
        let mut colors = vec![Color::White; n];

        for root in 0..n {
            if colors[root] != Color::White {
                continue;
            }
            // Explicit stack of (vertex, next-dependent cursor); `path`
            // mirrors the gray chain so a back edge can name its cycle.
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            let mut path: Vec<usize> = vec![root];
            colors[root] = Color::Gray;

            while let Some(&mut (vertex, ref mut cursor)) = stack.last_mut() {
                if let Some(&next) = adjacency.dependents[vertex].get(*cursor) {
                    *cursor += 1;
                    match colors[next] {
                        Color::White => {
                            colors[next] = Color::Gray;
                            stack.push((next, 0));
                            path.push(next);
                        }
                        Color::Gray => {
                            let start = path
                                .iter()
                                .position(|&v| v == next)
                                .unwrap_or_default();
                            let mut cycle: Vec<String> = path[start..]
                                .iter()
                                .map(|&v| self.vertices[v].id.clone())
                                .collect();
                            cycle.push(self.vertices[next].id.clone());
                            return Err(GraphError::CycleDetected { cycle });
                        }
                        Color::Black => {}
                    }
                } else {
                    colors[vertex] = Color::Black;
                    stack.pop();
                    path.pop();
                }
            }
        }
        Ok(())
    }

    /// Deterministic topological order via Kahn's algorithm, ties broken by
    /// declaration order. Used for reproducible logging and testing; run-time
    /// dispatch is wavefront-based and may interleave differently.
    pub fn sort_components(&self) -> Result<Vec<String>, GraphError> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let adjacency = self.compute_adjacency();
        let mut in_degree = adjacency.in_degree.clone();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.vertices.len());
        while let Some(Reverse(vertex)) = ready.pop() {
            order.push(self.vertices[vertex].id.clone());
            for &next in &adjacency.dependents[vertex] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.vertices.len() {
            // Unreachable after validation; kept for direct callers.
            self.detect_cycle()?;
        }
        Ok(order)
    }
}

/// Fluent constructor for [`FlowGraph`]; `build` runs structural validation.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    vertices: Vec<VertexDef>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_vertex(mut self, vertex: VertexDef) -> Self {
        self.vertices.push(vertex);
        self
    }

    #[must_use]
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        self.edges
            .push(Edge::new(source, source_output, target, target_input));
        self
    }

    pub fn build(self) -> Result<FlowGraph, GraphError> {
        let mut graph = FlowGraph::default();
        for vertex in self.vertices {
            if graph.index.contains_key(&vertex.id) {
                return Err(GraphError::DuplicateVertex { id: vertex.id });
            }
            graph.index.insert(vertex.id.clone(), graph.vertices.len());
            graph.vertices.push(vertex);
        }
        graph.edges = self.edges;
        graph.validate_structure()?;
        Ok(graph)
    }
}
