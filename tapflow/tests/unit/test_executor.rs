use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::json;
use tokio::time::{Duration, Instant};

use tapflow::engine::{RunContext, RunStatus};
use tapflow::errors::ErrorKind;
use tapflow::graph::WorkflowGraph;
use tapflow::models::workflow::{
    CheckType, ConditionConfig, DataSourceConfig, Delay, Edge, ElementCheck, ExecutionState,
    InputConfig, LoopConfig, Node, NodeKind, OnTimeout, OutputConfig, Port, WaitConfig, Workflow,
};

use crate::fakes::{edge, harness, tap, FakeScreen, FakeServices};

fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowGraph {
    WorkflowGraph::new(Workflow {
        id: "wf".to_string(),
        name: "executor".to_string(),
        nodes,
        edges,
    })
    .unwrap()
}

fn input() -> Node {
    Node::new("in", NodeKind::Input(InputConfig::default()))
}

fn output(id: &str) -> Node {
    Node::new(id, NodeKind::Output(OutputConfig::default()))
}

fn branching() -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new(
                "cond",
                NodeKind::Condition(ConditionConfig::new(ElementCheck::by_resource_id(
                    CheckType::Exists,
                    "btn_ok",
                ))),
            ),
            output("output_a"),
            output("output_b"),
        ],
        vec![
            edge("in", Port::Default, "cond"),
            edge("cond", Port::True, "output_a"),
            edge("cond", Port::False, "output_b"),
        ],
    )
}

#[tokio::test]
async fn test_condition_routes_on_present_element() {
    let h = harness(FakeScreen::showing(&["btn_ok"]), FakeServices::default());
    let outcome = h.executor.run(&branching(), RunContext::new("dev-1")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.ended_at.as_deref(), Some("output_a"));
    assert_eq!(outcome.node_states["output_b"], ExecutionState::Idle);
}

#[tokio::test]
async fn test_condition_routes_on_missing_element() {
    let h = harness(FakeScreen::showing(&["btn_cancel"]), FakeServices::default());
    let outcome = h.executor.run(&branching(), RunContext::new("dev-1")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.ended_at.as_deref(), Some("output_b"));
    assert_eq!(h.screen.inspections.load(Ordering::SeqCst), 1);
}

fn counted_loop(iterations: u32) -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new("loop", NodeKind::Loop(LoopConfig::count(iterations))),
            Node::new("tap", tap("Next")),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "loop"),
            edge("loop", Port::Loop, "tap"),
            edge("tap", Port::Default, "loop"),
            edge("loop", Port::Complete, "out"),
        ],
    )
}

#[tokio::test]
async fn test_count_loop_reports_each_iteration() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h.executor.run(&counted_loop(3), RunContext::new("dev-1")).await;

    assert!(outcome.is_success());
    assert_eq!(h.actions.count(), 3);

    let iterations: Vec<Option<u32>> = h
        .sink
        .for_node("loop")
        .into_iter()
        .filter(|u| u.state == ExecutionState::Success)
        .map(|u| u.current_iteration)
        .collect();
    assert_eq!(iterations, vec![Some(1), Some(2), Some(3), None]);
}

#[tokio::test]
async fn test_zero_count_loop_completes_immediately() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h.executor.run(&counted_loop(0), RunContext::new("dev-1")).await;

    assert!(outcome.is_success());
    assert_eq!(h.actions.count(), 0);
    assert_eq!(outcome.node_states["tap"], ExecutionState::Idle);
}

/// Outer count loop whose inner loop body jumps straight back to the outer loop
fn nested_loops(outer: u32, inner: u32) -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new("outer", NodeKind::Loop(LoopConfig::count(outer))),
            Node::new("inner", NodeKind::Loop(LoopConfig::count(inner))),
            Node::new("tap", tap("Inner")),
            Node::new(
                "done",
                NodeKind::Condition(ConditionConfig::new(ElementCheck::by_resource_id(
                    CheckType::Exists,
                    "btn_ok",
                ))),
            ),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "outer"),
            edge("outer", Port::Loop, "inner"),
            edge("inner", Port::Loop, "tap"),
            edge("inner", Port::Complete, "outer"),
            edge("tap", Port::Default, "done"),
            edge("done", Port::True, "outer"),
            edge("done", Port::False, "inner"),
            edge("outer", Port::Complete, "out"),
        ],
    )
}

#[tokio::test]
async fn test_inner_loop_restarts_each_outer_iteration() {
    let h = harness(FakeScreen::showing(&["btn_ok"]), FakeServices::default());
    let outcome = h
        .executor
        .run(&nested_loops(2, 2), RunContext::new("dev-1"))
        .await;

    assert!(outcome.is_success());
    assert_eq!(h.actions.count(), 2);

    let inner: Vec<Option<u32>> = h
        .sink
        .for_node("inner")
        .into_iter()
        .filter(|u| u.state == ExecutionState::Success)
        .map(|u| u.current_iteration)
        .collect();
    assert_eq!(inner, vec![Some(1), Some(1)]);
}

#[tokio::test]
async fn test_nested_loops_run_full_product() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h
        .executor
        .run(&nested_loops(2, 3), RunContext::new("dev-1"))
        .await;

    assert!(outcome.is_success());
    assert_eq!(h.actions.count(), 6);
}

fn data_loop() -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new(
                "rows",
                NodeKind::DataSource(DataSourceConfig {
                    collection_id: "{{collectionId}}".to_string(),
                    output_variable: "rows".to_string(),
                }),
            ),
            Node::new("loop", NodeKind::Loop(LoopConfig::over("rows", "row"))),
            Node::new("type", tap("{{row.name}}")),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "rows"),
            edge("rows", Port::Default, "loop"),
            edge("loop", Port::Loop, "type"),
            edge("type", Port::Default, "loop"),
            edge("loop", Port::Complete, "out"),
        ],
    )
}

fn services_with(collection: serde_json::Value) -> FakeServices {
    FakeServices {
        collections: HashMap::from([("contacts".to_string(), collection)]),
    }
}

fn collection_vars() -> HashMap<String, serde_json::Value> {
    HashMap::from([("collectionId".to_string(), json!("contacts"))])
}

#[tokio::test]
async fn test_data_loop_binds_each_item() {
    let h = harness(
        FakeScreen::showing(&[]),
        services_with(json!([{"name": "Ada"}, {"name": "Grace"}])),
    );
    let outcome = h
        .executor
        .run(
            &data_loop(),
            RunContext::new("dev-1").with_variables(collection_vars()),
        )
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.message);
    let typed: Vec<String> = h
        .actions
        .performed()
        .into_iter()
        .filter_map(|a| a.text)
        .collect();
    assert_eq!(typed, vec!["Ada", "Grace"]);
    assert_eq!(outcome.variables["row"], json!({"name": "Grace"}));
}

#[tokio::test]
async fn test_data_loop_over_empty_collection() {
    let h = harness(FakeScreen::showing(&[]), services_with(json!([])));
    let outcome = h
        .executor
        .run(
            &data_loop(),
            RunContext::new("dev-1").with_variables(collection_vars()),
        )
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.ended_at.as_deref(), Some("out"));
    assert_eq!(h.actions.count(), 0);
}

fn gated(probability: u8) -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new("tap", tap("Maybe")).with_probability(probability),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "tap"),
            edge("tap", Port::Default, "out"),
        ],
    )
}

#[tokio::test]
async fn test_probability_bounds_over_many_runs() {
    let never = harness(FakeScreen::showing(&[]), FakeServices::default());
    let always = harness(FakeScreen::showing(&[]), FakeServices::default());
    let (zero, hundred) = (gated(0), gated(100));

    for seed in 0..1000 {
        let skipped = never
            .executor
            .run(&zero, RunContext::new("dev-1").with_seed(seed))
            .await;
        assert!(skipped.is_success());
        assert_eq!(skipped.ended_at.as_deref(), Some("out"));

        always
            .executor
            .run(&hundred, RunContext::new("dev-1").with_seed(seed))
            .await;
    }

    assert_eq!(never.actions.count(), 0);
    assert_eq!(always.actions.count(), 1000);
}

#[tokio::test]
async fn test_probability_skip_is_reported_as_success() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    h.executor
        .run(&gated(0), RunContext::new("dev-1").with_seed(3))
        .await;

    let last = h.sink.for_node("tap").pop().unwrap();
    assert_eq!(last.state, ExecutionState::Success);
    assert_eq!(last.message.as_deref(), Some("skipped"));
}

#[tokio::test]
async fn test_seeded_runs_repeat_the_same_choices() {
    let a = harness(FakeScreen::showing(&[]), FakeServices::default());
    let b = harness(FakeScreen::showing(&[]), FakeServices::default());
    let half = gated(50);

    for seed in 0..100 {
        a.executor
            .run(&half, RunContext::new("dev-1").with_seed(seed))
            .await;
        b.executor
            .run(&half, RunContext::new("dev-1").with_seed(seed))
            .await;
    }
    assert_eq!(a.actions.count(), b.actions.count());
    assert!(a.actions.count() > 20 && a.actions.count() < 80);
}

fn delayed(delay: Delay) -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new("tap", tap("Later")).with_delay(delay),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "tap"),
            edge("tap", Port::Default, "out"),
        ],
    )
}

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_waits_before_acting() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let started = Instant::now();
    let outcome = h
        .executor
        .run(
            &delayed(Delay::Fixed { fixed_ms: 500 }),
            RunContext::new("dev-1"),
        )
        .await;

    assert!(outcome.is_success());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_random_delay_spans_range() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let graph = delayed(Delay::Random {
        min_ms: 500,
        max_ms: 1500,
    });

    let mut shortest = Duration::MAX;
    let mut longest = Duration::ZERO;
    for seed in 0..200 {
        let started = Instant::now();
        h.executor
            .run(&graph, RunContext::new("dev-1").with_seed(seed))
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(1600), "{:?}", elapsed);
        shortest = shortest.min(elapsed);
        longest = longest.max(elapsed);
    }

    // over many seeds the delays cover the whole range
    assert!(shortest < Duration::from_millis(600), "{:?}", shortest);
    assert!(longest > Duration::from_millis(1400), "{:?}", longest);
}

fn waiting(on_timeout: OnTimeout) -> WorkflowGraph {
    graph(
        vec![
            input(),
            Node::new(
                "wait",
                NodeKind::Wait(WaitConfig::for_element(
                    ElementCheck::by_resource_id(CheckType::Exists, "spinner_done"),
                    1_000,
                    on_timeout,
                )),
            ),
            Node::new("tap", tap("Continue")),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "wait"),
            edge("wait", Port::Default, "tap"),
            edge("tap", Port::Default, "out"),
        ],
    )
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_skip_continues() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h
        .executor
        .run(&waiting(OnTimeout::Skip), RunContext::new("dev-1"))
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.node_states["wait"], ExecutionState::Timeout);
    assert_eq!(h.actions.count(), 1);
    assert!(h.screen.inspections.load(Ordering::SeqCst) > 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_fail_halts_run() {
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h
        .executor
        .run(&waiting(OnTimeout::Fail), RunContext::new("dev-1"))
        .await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(outcome.failed_node.as_deref(), Some("wait"));
    assert_eq!(outcome.node_states["wait"], ExecutionState::Error);
    assert_eq!(h.actions.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_satisfied_once_element_appears() {
    let h = harness(FakeScreen::showing(&["spinner_done"]), FakeServices::default());
    let outcome = h
        .executor
        .run(&waiting(OnTimeout::Fail), RunContext::new("dev-1"))
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.node_states["wait"], ExecutionState::Success);
    assert_eq!(h.screen.inspections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_action_failure_halts_run() {
    let g = graph(
        vec![
            input(),
            Node::new("tap", tap("fail")),
            Node::new("after", tap("never")),
            output("out"),
        ],
        vec![
            edge("in", Port::Default, "tap"),
            edge("tap", Port::Default, "after"),
            edge("after", Port::Default, "out"),
        ],
    );
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let outcome = h.executor.run(&g, RunContext::new("dev-1")).await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Action));
    assert_eq!(outcome.failed_node.as_deref(), Some("tap"));
    assert_eq!(h.actions.count(), 1);
}
