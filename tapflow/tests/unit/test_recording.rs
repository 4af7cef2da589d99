use std::sync::Arc;
use std::time::Duration;

use tapflow::channel::topics::Topics;
use tapflow::channel::MemoryTransport;
use tapflow::engine::RunContext;
use tapflow::errors::FlowError;
use tapflow::graph::{validate, WorkflowGraph};
use tapflow::models::recording::{OrderedEvent, RecordingSignal};
use tapflow::models::workflow::{ActionType, Direction, NodeKind, NodeVariant, Point};
use tapflow::recording::{RecordingStore, SessionState};
use tapflow::workers::recorder;

use crate::fakes::{harness, FakeScreen, FakeServices};

fn tap_at(seq: u64, x: i32, y: i32) -> OrderedEvent {
    let mut event = OrderedEvent::new(seq, ActionType::Tap);
    event.payload.coordinates = Some(Point { x, y });
    event
}

fn scroll_down(seq: u64) -> OrderedEvent {
    let mut event = OrderedEvent::new(seq, ActionType::Scroll);
    event.payload.direction = Some(Direction::Down);
    event
}

fn recorded(store: &RecordingStore, device_id: &str, events: Vec<OrderedEvent>) {
    store.apply(device_id, RecordingSignal::Start).unwrap();
    for event in events {
        store.apply(device_id, RecordingSignal::Event { event }).unwrap();
    }
    store.apply(device_id, RecordingSignal::Stop).unwrap();
}

#[tokio::test]
async fn test_recording_becomes_runnable_workflow() {
    let store = RecordingStore::new();
    recorded(
        &store,
        "dev-1",
        vec![tap_at(1, 100, 200), scroll_down(2), scroll_down(3), tap_at(4, 300, 400)],
    );

    let session = store.frozen("dev-1").unwrap();
    let workflow = session.to_workflow("login flow");
    assert!(validate(&workflow).is_ok());

    let actions: Vec<_> = workflow
        .nodes
        .iter()
        .filter_map(|n| match &n.kind {
            NodeKind::Action(action) => Some(action.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(actions.len(), 3);
    assert_eq!(actions[0].coordinates, Some(Point { x: 100, y: 200 }));
    assert_eq!(actions[1].action, ActionType::Scroll);
    assert_eq!(actions[1].repeat_count, 2);
    assert_eq!(actions[2].coordinates, Some(Point { x: 300, y: 400 }));
    assert_eq!(workflow.nodes_of(NodeVariant::Input).count(), 1);
    assert_eq!(workflow.nodes_of(NodeVariant::Output).count(), 1);

    // replaying performs every recorded gesture, scrolls included
    let h = harness(FakeScreen::showing(&[]), FakeServices::default());
    let graph = WorkflowGraph::new(workflow).unwrap();
    let outcome = h.executor.run(&graph, RunContext::new("dev-1")).await;
    assert!(outcome.is_success());
    assert_eq!(h.actions.count(), 4);
}

#[test]
fn test_events_after_stop_are_dropped() {
    let store = RecordingStore::new();
    recorded(&store, "dev-1", vec![tap_at(1, 1, 1)]);
    store
        .apply(
            "dev-1",
            RecordingSignal::Event {
                event: tap_at(2, 2, 2),
            },
        )
        .unwrap();

    let session = store.session("dev-1").unwrap();
    assert_eq!(session.state, SessionState::Frozen);
    assert_eq!(session.events().len(), 1);
    assert_eq!(session.dropped(), 1);
}

#[test]
fn test_live_session_cannot_be_imported() {
    let store = RecordingStore::new();
    store.apply("dev-1", RecordingSignal::Start).unwrap();

    assert!(matches!(
        store.frozen("dev-1"),
        Err(FlowError::ValidationError(_))
    ));
    assert!(matches!(
        store.frozen("dev-2"),
        Err(FlowError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_recorder_worker_feeds_store_from_transport() {
    let transport = Arc::new(MemoryTransport::new());
    let store = RecordingStore::new();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let worker = {
        let transport = transport.clone();
        let store = store.clone();
        tokio::spawn(async move {
            recorder::run(
                transport.as_ref(),
                &store,
                Box::pin(async move {
                    let _ = stop_rx.await;
                }),
            )
            .await;
        })
    };

    let topic = Topics::recording_events("dev-7");
    while !transport.is_subscribed(&Topics::all_recording_events()) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    transport.inject_json(&topic, &RecordingSignal::Start).unwrap();
    transport
        .inject_json(
            &topic,
            &RecordingSignal::Event {
                event: tap_at(1, 5, 5),
            },
        )
        .unwrap();
    transport.inject_json(&topic, &RecordingSignal::Stop).unwrap();

    let mut frozen = None;
    for _ in 0..100 {
        if let Some(session) = store.session("dev-7").filter(|s| !s.is_live()) {
            frozen = Some(session);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let session = frozen.expect("session was not frozen");
    assert_eq!(session.events().len(), 1);

    stop_tx.send(()).unwrap();
    worker.await.unwrap();
    assert!(!transport.is_subscribed(&Topics::all_recording_events()));
}
