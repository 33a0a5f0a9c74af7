//! Component contract and registry.
//!
//! A [`Component`] is a pluggable computation unit: it declares its input and
//! output ports and exposes a single async build entry point. Concrete
//! implementations live outside this crate; they are registered by name in a
//! [`ComponentRegistry`] and attached to vertices when a graph definition is
//! loaded. Dispatch is by `component_type` string, never by reflection.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Declared value type of an input or output port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Text,
    Number,
    Boolean,
    List,
    Map,
    /// Accepts or produces any JSON value.
    Any,
}

/// One declared input or output of a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port_type: PortType,
    pub required: bool,
}

impl PortSpec {
    /// A required port of the given type.
    pub fn required(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: true,
        }
    }

    /// An optional port of the given type.
    pub fn optional(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: false,
        }
    }
}

/// Fully resolved parameters handed to a component build: every reference has
/// been substituted and non-serializable values stripped.
pub type ResolvedParams = FxHashMap<String, Value>;

/// What a successful component build hands back to the engine: values for the
/// declared output ports plus an opaque artifacts payload kept for debugging
/// and UI consumption.
#[derive(Clone, Debug, Default)]
pub struct BuildOutput {
    pub outputs: FxHashMap<String, Value>,
    pub artifacts: Value,
}

impl BuildOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for one declared output port.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// Attach an opaque artifacts payload.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Value) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// The capability contract every concrete component implements.
///
/// Implementations should be stateless: all per-invocation data arrives in
/// `params`, and the engine treats two builds with equal resolved params,
/// `component_type`, and [`version`](Self::version) as interchangeable for
/// caching purposes. Network retries, timeouts, and internal cancellation are
/// the component's own responsibility.
#[async_trait]
pub trait Component: Send + Sync {
    /// Declared input ports, in declaration order.
    fn inputs(&self) -> Vec<PortSpec>;

    /// Declared output ports, in declaration order.
    fn outputs(&self) -> Vec<PortSpec>;

    /// Implementation version; part of the cache fingerprint, so bump it when
    /// the build semantics change.
    fn version(&self) -> &str {
        "1"
    }

    /// Execute the component against fully resolved parameters.
    async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError>;
}

/// Errors a component build may raise.
///
/// These never escape the engine as uncaught failures: the vertex that owns
/// the build captures them into its `BuildResult` and the run continues per
/// the configured failure policy.
#[derive(Debug, Error, Diagnostic)]
pub enum ComponentError {
    /// A required parameter was absent from the resolved set.
    #[error("missing required parameter: {name}")]
    #[diagnostic(
        code(flowgraph::component::missing_param),
        help("Check the vertex's raw_params and incoming edges for this input.")
    )]
    MissingParam { name: String },

    /// A parameter was present but unusable.
    #[error("invalid parameter `{name}`: {reason}")]
    #[diagnostic(code(flowgraph::component::invalid_param))]
    InvalidParam { name: String, reason: String },

    /// The component body failed.
    #[error("{message}")]
    #[diagnostic(code(flowgraph::component::build_failed))]
    BuildFailed { message: String },

    /// JSON (de)serialization inside the component failed.
    #[error(transparent)]
    #[diagnostic(code(flowgraph::component::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl ComponentError {
    pub fn build_failed(message: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
        }
    }
}

type ComponentFactory = Arc<dyn Fn() -> Arc<dyn Component> + Send + Sync>;

/// Maps `component_type` tags to factories producing component instances.
///
/// The registry is the seam between the engine and the (out-of-scope)
/// component catalog: the engine never knows concrete types, only this
/// name-to-factory mapping.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    factories: FxHashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a component type tag, replacing any previous
    /// registration for the same tag.
    pub fn register<C, F>(&mut self, component_type: impl Into<String>, factory: F)
    where
        C: Component + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.factories.insert(
            component_type.into(),
            Arc::new(move || Arc::new(factory()) as Arc<dyn Component>),
        );
    }

    /// Produce a fresh instance for the given tag, if registered.
    #[must_use]
    pub fn instantiate(&self, component_type: &str) -> Option<Arc<dyn Component>> {
        self.factories.get(component_type).map(|factory| factory())
    }

    #[must_use]
    pub fn contains(&self, component_type: &str) -> bool {
        self.factories.contains_key(component_type)
    }

    /// Registered tags in sorted order, for deterministic listings.
    #[must_use]
    pub fn component_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("component_types", &self.component_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Component for Echo {
        fn inputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::required("value", PortType::Any)]
        }

        fn outputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::required("value", PortType::Any)]
        }

        async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
            let value = params
                .get("value")
                .cloned()
                .ok_or_else(|| ComponentError::MissingParam {
                    name: "value".into(),
                })?;
            Ok(BuildOutput::new().with_output("value", value))
        }
    }

    #[test]
    fn registry_instantiates_by_tag() {
        let mut registry = ComponentRegistry::new();
        registry.register("echo", || Echo);
        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));
        assert!(registry.instantiate("echo").is_some());
        assert_eq!(registry.component_types(), vec!["echo"]);
    }

    #[tokio::test]
    async fn echo_round_trips_value() {
        let component = Echo;
        let mut params = ResolvedParams::default();
        params.insert("value".into(), json!({"x": 5}));
        let out = component.build(&params).await.unwrap();
        assert_eq!(out.outputs["value"], json!({"x": 5}));
    }

    #[tokio::test]
    async fn missing_param_is_reported() {
        let component = Echo;
        let err = component.build(&ResolvedParams::default()).await.unwrap_err();
        assert!(matches!(err, ComponentError::MissingParam { .. }));
    }
}
