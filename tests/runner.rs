//! End-to-end runs through the public `FlowRunner` surface.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use flowgraph::cache::BuildCache;
use flowgraph::component::ComponentRegistry;
use flowgraph::graph::{Edge, GraphBuilder, GraphError, VertexDef};
use flowgraph::runner::{FlowRunner, ParamOverrides, RunnerConfig};
use flowgraph::scheduler::CancelToken;
use flowgraph::types::{BuildState, FailurePolicy, RunStatus};
use serde_json::json;

fn hello_pipeline() -> flowgraph::graph::FlowGraph {
    GraphBuilder::new()
        .add_vertex(VertexDef::new("in1", "text_input").with_param("value", json!("hello")))
        .add_vertex(VertexDef::new("up1", "upper").with_param("input", json!("@in1.value")))
        .add_vertex(VertexDef::new("out1", "text_output").with_param("input", json!("@up1.value")))
        .add_edge("in1", "value", "up1", "input")
        .add_edge("up1", "value", "out1", "input")
        .build()
        .unwrap()
}

#[tokio::test]
async fn pipeline_runs_end_to_end() {
    let mut runner = FlowRunner::new(hello_pipeline(), standard_registry());
    let result = runner.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.is_success());
    assert_eq!(result.output("out1", "output"), Some(&json!("HELLO")));
    for id in ["in1", "up1", "out1"] {
        assert_eq!(result.result(id).unwrap().status, BuildState::Built);
    }
}

#[tokio::test]
async fn overrides_change_the_outcome_without_stale_cache_reuse() {
    let mut runner = FlowRunner::new(hello_pipeline(), standard_registry());

    let first = runner.run().await.unwrap();
    assert_eq!(first.output("out1", "output"), Some(&json!("HELLO")));

    let overrides = ParamOverrides::new().set("in1", "value", json!("hi"));
    let second = runner.run_with_overrides(overrides).await.unwrap();
    assert_eq!(second.output("out1", "output"), Some(&json!("HI")));
    // Different resolved input means a different fingerprint for up1.
    assert!(!second.result("up1").unwrap().cache_hit);
}

#[tokio::test]
async fn repeat_runs_hit_the_cache() {
    let mut runner = FlowRunner::new(hello_pipeline(), standard_registry());
    runner.run().await.unwrap();
    let second = runner.run().await.unwrap();

    for id in ["in1", "up1", "out1"] {
        assert!(
            second.result(id).unwrap().cache_hit,
            "expected cache hit for {id}"
        );
    }
    assert_eq!(second.output("out1", "output"), Some(&json!("HELLO")));
}

#[tokio::test]
async fn failure_skips_downstream_and_spares_independent_branches() {
    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("a", "always_fails"))
        .add_vertex(VertexDef::new("b", "text_output").with_param("input", json!("@a.value")))
        .add_vertex(VertexDef::new("c", "text_input").with_param("value", json!("independent")))
        .add_edge("a", "value", "b", "input")
        .build()
        .unwrap();
    let mut runner = FlowRunner::new(graph, standard_registry());
    let result = runner.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.result("a").unwrap().status, BuildState::Failed);

    let b = result.result("b").unwrap();
    assert_eq!(b.status, BuildState::Skipped);
    assert!(b.error.as_deref().unwrap().contains("`a`"));

    let c = result.result("c").unwrap();
    assert_eq!(c.status, BuildState::Built);
    assert_eq!(c.output("value"), Some(&json!("independent")));
}

#[tokio::test]
async fn stop_on_first_error_cancels_undispatched_work() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = standard_registry();
    {
        let calls = Arc::clone(&calls);
        registry.register("counting", move || Counting::new(Arc::clone(&calls)));
    }

    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("bad", "always_fails"))
        .add_vertex(VertexDef::new("later", "counting"))
        .add_edge("bad", "value", "later", "seed")
        .build()
        .unwrap();
    let config = RunnerConfig::default()
        .with_max_in_flight(1)
        .with_failure_policy(FailurePolicy::StopOnFirstError);
    let mut runner = FlowRunner::with_config(graph, registry, config);
    let result = runner.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.result("later").unwrap().status, BuildState::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_between_vertices_yields_cancelled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = standard_registry();
    {
        let calls = Arc::clone(&calls);
        registry.register("slow_counting", move || {
            Counting::with_delay(Arc::clone(&calls), Duration::from_millis(40))
        });
    }

    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("a", "slow_counting"))
        .add_vertex(VertexDef::new("b", "text_output").with_param("input", json!("@a.value")))
        .add_edge("a", "value", "b", "input")
        .build()
        .unwrap();
    let mut runner = FlowRunner::new(graph, registry);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let result = runner
        .run_with(ParamOverrides::default(), cancel)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    // `a` was in flight and allowed to finish within the grace period.
    assert_eq!(result.result("a").unwrap().status, BuildState::Built);
    let b = result.result("b").unwrap();
    assert_eq!(b.status, BuildState::Skipped);
    assert!(b.error.as_deref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn validation_failure_aborts_with_no_partial_execution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ComponentRegistry::new();
    {
        let calls = Arc::clone(&calls);
        registry.register("counting", move || Counting::new(Arc::clone(&calls)));
    }

    let mut graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("a", "counting"))
        .add_vertex(VertexDef::new("b", "counting"))
        .add_edge("a", "value", "b", "seed")
        .build()
        .unwrap();
    // Introduce a cycle after construction; the next run must refuse it.
    graph.add_edge(Edge::new("b", "value", "a", "seed")).unwrap();

    let mut runner = FlowRunner::new(graph, registry);
    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn override_for_unknown_vertex_is_rejected() {
    let mut runner = FlowRunner::new(hello_pipeline(), standard_registry());
    let overrides = ParamOverrides::new().set("ghost", "value", json!("x"));
    let err = runner.run_with_overrides(overrides).await.unwrap_err();
    assert!(matches!(err, GraphError::UnknownVertex { id } if id == "ghost"));
}

#[tokio::test]
async fn unsatisfied_required_input_fails_validation() {
    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("up1", "upper"))
        .build()
        .unwrap();
    let mut runner = FlowRunner::new(graph, standard_registry());
    let err = runner.run().await.unwrap_err();
    assert!(
        matches!(err, GraphError::UnsatisfiedInput { vertex, input } if vertex == "up1" && input == "input")
    );
}

#[tokio::test]
async fn concurrent_runs_share_one_flight_per_fingerprint() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(BuildCache::new());

    let make_runner = || {
        let mut registry = ComponentRegistry::new();
        let calls = Arc::clone(&calls);
        registry.register("slow_counting", move || {
            Counting::with_delay(Arc::clone(&calls), Duration::from_millis(30))
        });
        let graph = GraphBuilder::new()
            .add_vertex(VertexDef::new("v", "slow_counting").with_param("seed", json!("same")))
            .build()
            .unwrap();
        FlowRunner::with_shared_cache(
            graph,
            registry,
            RunnerConfig::default(),
            Arc::clone(&cache),
        )
    };

    let mut handles = Vec::new();
    for _ in 0..2 {
        let mut runner = make_runner();
        handles.push(tokio::spawn(async move { runner.run().await.unwrap() }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.output("v", "value"), Some(&json!("same")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn graph_mutation_between_runs_is_revalidated() {
    let mut runner = FlowRunner::new(hello_pipeline(), standard_registry());
    runner.run().await.unwrap();

    runner
        .graph_mut()
        .add_vertex(VertexDef::new("extra", "text_input").with_param("value", json!("more")))
        .unwrap();
    let result = runner.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.output("extra", "value"), Some(&json!("more")));
}

#[tokio::test]
async fn vertex_without_registration_fails_alone() {
    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("mystery", "unregistered_type"))
        .add_vertex(VertexDef::new("in1", "text_input").with_param("value", json!("ok")))
        .build()
        .unwrap();
    let mut runner = FlowRunner::new(graph, standard_registry());
    let result = runner.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let mystery = result.result("mystery").unwrap();
    assert_eq!(mystery.status, BuildState::Failed);
    assert!(
        mystery
            .error
            .as_deref()
            .unwrap()
            .contains("unregistered_type")
    );
    assert_eq!(result.result("in1").unwrap().status, BuildState::Built);
}
