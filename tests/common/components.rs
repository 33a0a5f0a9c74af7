//! Components shared by the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowgraph::component::{
    BuildOutput, Component, ComponentError, ComponentRegistry, PortSpec, PortType, ResolvedParams,
};
use serde_json::{Value, json};

/// Emits its `value` parameter unchanged on the `value` output.
#[derive(Debug, Clone)]
pub struct TextInput;

#[async_trait]
impl Component for TextInput {
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("value", PortType::Text)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("value", PortType::Text)]
    }

    async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
        let value = params
            .get("value")
            .cloned()
            .ok_or(ComponentError::MissingParam {
                name: "value".into(),
            })?;
        Ok(BuildOutput::new().with_output("value", value))
    }
}

/// Uppercases its text input.
#[derive(Debug, Clone)]
pub struct Upper;

#[async_trait]
impl Component for Upper {
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("input", PortType::Text)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("value", PortType::Text)]
    }

    async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
        let input = params
            .get("input")
            .and_then(Value::as_str)
            .ok_or(ComponentError::MissingParam {
                name: "input".into(),
            })?;
        Ok(BuildOutput::new().with_output("value", json!(input.to_uppercase())))
    }
}

/// Forwards its input to an `output` port, as a terminal display node would.
#[derive(Debug, Clone)]
pub struct TextOutput;

#[async_trait]
impl Component for TextOutput {
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("input", PortType::Text)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("output", PortType::Text)]
    }

    async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
        let input = params
            .get("input")
            .cloned()
            .ok_or(ComponentError::MissingParam {
                name: "input".into(),
            })?;
        Ok(BuildOutput::new().with_output("output", input))
    }
}

/// Always fails with a recognizable message.
#[derive(Debug, Clone)]
pub struct AlwaysFails;

#[async_trait]
impl Component for AlwaysFails {
    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("value", PortType::Any)]
    }

    async fn build(&self, _params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
        Err(ComponentError::BuildFailed {
            message: "always fails".into(),
        })
    }
}

/// Counts invocations and optionally sleeps, for cache and cancellation
/// tests.
#[derive(Debug, Clone)]
pub struct Counting {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl Counting {
    pub fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            calls,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(calls: Arc<AtomicUsize>, delay: Duration) -> Self {
        Self { calls, delay }
    }
}

#[async_trait]
impl Component for Counting {
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::optional("seed", PortType::Any)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("value", PortType::Any)]
    }

    async fn build(&self, params: &ResolvedParams) -> Result<BuildOutput, ComponentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let seed = params.get("seed").cloned().unwrap_or(json!("counted"));
        Ok(BuildOutput::new().with_output("value", seed))
    }
}

/// Registry with every fixture component registered under its usual tag.
pub fn standard_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register("text_input", || TextInput);
    registry.register("upper", || Upper);
    registry.register("text_output", || TextOutput);
    registry.register("always_fails", || AlwaysFails);
    registry
}
