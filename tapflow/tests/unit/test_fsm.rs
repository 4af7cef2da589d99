use tapflow::engine::fsm::{NodeEvent, NodeFsm};
use tapflow::models::workflow::ExecutionState;

fn running() -> NodeFsm {
    let mut fsm = NodeFsm::new();
    fsm.process(NodeEvent::Schedule).unwrap();
    fsm.process(NodeEvent::Start).unwrap();
    fsm
}

#[test]
fn test_failure_records_message() {
    let mut fsm = running();
    fsm.process(NodeEvent::Fail("gesture rejected".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), ExecutionState::Error);
    assert_eq!(fsm.error(), Some("gesture rejected"));
}

#[test]
fn test_rescheduling_clears_previous_error() {
    let mut fsm = running();
    fsm.process(NodeEvent::Fail("first pass".to_string())).unwrap();

    fsm.process(NodeEvent::Schedule).unwrap();
    assert_eq!(fsm.state(), ExecutionState::Pending);
    assert_eq!(fsm.error(), None);
}

#[test]
fn test_timeout_skip_can_be_rescheduled() {
    let mut fsm = running();
    fsm.process(NodeEvent::TimeOut).unwrap();
    fsm.process(NodeEvent::Schedule).unwrap();
    fsm.process(NodeEvent::Start).unwrap();
    assert_eq!(fsm.state(), ExecutionState::Running);
    assert_eq!(fsm.visits(), 2);
}

#[test]
fn test_running_node_cannot_be_rescheduled() {
    let mut fsm = running();
    assert!(fsm.process(NodeEvent::Schedule).is_err());
    assert!(fsm.process(NodeEvent::Start).is_err());
    assert_eq!(fsm.state(), ExecutionState::Running);
}

#[test]
fn test_reset_returns_to_idle() {
    let mut fsm = running();
    fsm.process(NodeEvent::Succeed).unwrap();
    fsm.process(NodeEvent::Reset).unwrap();
    assert_eq!(fsm.state(), ExecutionState::Idle);
}
