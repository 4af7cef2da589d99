//! Per-node execution state machine

use crate::models::workflow::ExecutionState;

/// Node lifecycle event
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Cursor reached the node
    Schedule,

    /// Node starts executing
    Start,

    /// Execution (or probability skip) completed
    Succeed,

    /// Wait exhausted its timeout
    TimeOut,

    /// Execution failed
    Fail(String),

    /// Back to idle
    Reset,
}

/// Node FSM: `idle -> pending -> running -> (success | error | timeout)`.
///
/// A node inside a loop body is visited again; scheduling is allowed from
/// any terminal state.
#[derive(Debug, Clone, Default)]
pub struct NodeFsm {
    state: ExecutionState,
    error: Option<String>,
    visits: u32,
}

impl NodeFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// How many times the node started running
    pub fn visits(&self) -> u32 {
        self.visits
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: NodeEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // Scheduling
            (ExecutionState::Idle, NodeEvent::Schedule) => ExecutionState::Pending,
            (state, NodeEvent::Schedule) if state.is_terminal() => {
                self.error = None;
                ExecutionState::Pending
            }

            // From Pending
            (ExecutionState::Pending, NodeEvent::Start) => {
                self.visits += 1;
                ExecutionState::Running
            }

            // From Running
            (ExecutionState::Running, NodeEvent::Succeed) => ExecutionState::Success,
            (ExecutionState::Running, NodeEvent::TimeOut) => ExecutionState::Timeout,
            (ExecutionState::Running, NodeEvent::Fail(err)) => {
                self.error = Some(err.clone());
                ExecutionState::Error
            }

            // From Timeout: onTimeout=fail
            (ExecutionState::Timeout, NodeEvent::Fail(err)) => {
                self.error = Some(err.clone());
                ExecutionState::Error
            }

            (_, NodeEvent::Reset) => {
                self.error = None;
                ExecutionState::Idle
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
