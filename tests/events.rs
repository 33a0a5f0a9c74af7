//! Event timeline ordering and sink fan-out.

mod common;

use common::*;
use flowgraph::event_bus::{Event, EventBus, MemorySink, RunEventKind};
use flowgraph::graph::{GraphBuilder, VertexDef};
use flowgraph::runner::FlowRunner;
use flowgraph::types::{BuildState, RunStatus};
use serde_json::json;

fn pipeline() -> flowgraph::graph::FlowGraph {
    GraphBuilder::new()
        .add_vertex(VertexDef::new("in1", "text_input").with_param("value", json!("hello")))
        .add_vertex(VertexDef::new("up1", "upper").with_param("input", json!("@in1.value")))
        .add_edge("in1", "value", "up1", "input")
        .build()
        .unwrap()
}

fn position(timeline: &[Event], vertex: &str, state: BuildState) -> usize {
    timeline
        .iter()
        .position(|e| e.vertex_id() == Some(vertex) && e.build_state() == Some(state))
        .unwrap_or_else(|| panic!("no {state} event for {vertex}"))
}

#[tokio::test]
async fn timeline_brackets_the_run_and_orders_transitions() {
    let mut runner = FlowRunner::new(pipeline(), standard_registry());
    let result = runner.run().await.unwrap();
    let timeline = &result.timeline;

    assert!(matches!(
        timeline.first(),
        Some(Event::Run(event)) if event.kind == RunEventKind::Started
    ));
    assert!(matches!(
        timeline.last(),
        Some(Event::Run(event))
            if event.kind == (RunEventKind::Finished { status: RunStatus::Completed })
    ));

    // Per-vertex statechart order.
    for vertex in ["in1", "up1"] {
        let resolving = position(timeline, vertex, BuildState::Resolving);
        let building = position(timeline, vertex, BuildState::Building);
        let built = position(timeline, vertex, BuildState::Built);
        assert!(resolving < building && building < built, "vertex {vertex}");
    }

    // A dependent never starts before its dependency is Built.
    assert!(
        position(timeline, "in1", BuildState::Built)
            < position(timeline, "up1", BuildState::Resolving)
    );
}

#[tokio::test]
async fn failure_and_skip_events_carry_details() {
    let graph = GraphBuilder::new()
        .add_vertex(VertexDef::new("a", "always_fails"))
        .add_vertex(VertexDef::new("b", "text_output").with_param("input", json!("@a.value")))
        .add_edge("a", "value", "b", "input")
        .build()
        .unwrap();
    let mut runner = FlowRunner::new(graph, standard_registry());
    let result = runner.run().await.unwrap();

    let failed = result
        .timeline
        .iter()
        .find_map(|e| match e {
            Event::Vertex(v) if v.state == BuildState::Failed => Some(v),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed.vertex_id, "a");
    assert!(failed.detail.as_deref().unwrap().contains("always fails"));

    let skipped = result
        .timeline
        .iter()
        .find_map(|e| match e {
            Event::Vertex(v) if v.state == BuildState::Skipped => Some(v),
            _ => None,
        })
        .unwrap();
    assert_eq!(skipped.vertex_id, "b");
    assert!(skipped.detail.as_deref().unwrap().contains("`a`"));
}

#[tokio::test]
async fn channel_subscribers_stream_events_as_they_occur() {
    let bus = EventBus::with_sink(MemorySink::new());
    let mut runner = FlowRunner::new(pipeline(), standard_registry()).with_event_bus(bus);
    let mut rx = runner.subscribe_events().unwrap();

    let result = runner.run().await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    let mut streamed = Vec::new();
    loop {
        let event = rx.recv().await.expect("stream ended early");
        let finished = matches!(
            &event,
            Event::Run(run) if matches!(run.kind, RunEventKind::Finished { .. })
        );
        streamed.push(event);
        if finished {
            break;
        }
    }
    runner.shutdown().await;

    // The stream carries the same events, in the same order, as the
    // recorder timeline.
    assert_eq!(streamed, result.timeline);
}

#[tokio::test]
async fn outcomes_are_identical_with_and_without_observers() {
    let mut plain = FlowRunner::new(pipeline(), standard_registry());
    let plain_result = plain.run().await.unwrap();

    let bus = EventBus::with_sink(MemorySink::new());
    let mut observed = FlowRunner::new(pipeline(), standard_registry()).with_event_bus(bus);
    let observed_result = observed.run().await.unwrap();
    observed.shutdown().await;

    assert_eq!(plain_result.status, observed_result.status);
    for id in ["in1", "up1"] {
        let a = plain_result.result(id).unwrap();
        let b = observed_result.result(id).unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.outputs, b.outputs);
    }
}
