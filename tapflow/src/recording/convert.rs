//! Recorded events to workflow conversion

use tracing::{debug, warn};

use crate::graph::action_problem;
use crate::models::recording::OrderedEvent;
use crate::models::workflow::{
    ActionConfig, ActionType, Edge, InputConfig, Node, NodeKind, OutputConfig, Port, Workflow,
};

pub const INPUT_NODE_ID: &str = "input";
pub const OUTPUT_NODE_ID: &str = "output";

/// Linear `Input -> Action* -> Output` workflow, one Action per event.
///
/// Consecutive identical scroll events collapse into a single node with a
/// `repeat_count`. Events whose payload is too sparse to replay are left out,
/// so the result always validates.
pub fn to_workflow(id: &str, name: &str, events: &[OrderedEvent]) -> Workflow {
    let actions = collapse(events);
    debug!(
        "Converting {} recorded event(s) into {} action node(s)",
        events.len(),
        actions.len()
    );

    let mut nodes = Vec::with_capacity(actions.len() + 2);
    nodes.push(Node::new(INPUT_NODE_ID, NodeKind::Input(InputConfig::default())));
    for (i, action) in actions.into_iter().enumerate() {
        nodes.push(Node::new(format!("action-{}", i + 1), NodeKind::Action(action)));
    }
    nodes.push(Node::new(OUTPUT_NODE_ID, NodeKind::Output(OutputConfig::default())));

    let edges = nodes
        .windows(2)
        .map(|pair| Edge::new(pair[0].id.clone(), Port::Default, pair[1].id.clone()))
        .collect();

    Workflow {
        id: id.to_string(),
        name: name.to_string(),
        nodes,
        edges,
    }
}

fn collapse(events: &[OrderedEvent]) -> Vec<ActionConfig> {
    let mut actions: Vec<ActionConfig> = Vec::new();
    let mut previous: Option<&OrderedEvent> = None;

    for event in events {
        let action = action_for(event);
        if let Some(reason) = action_problem(&action) {
            warn!(
                "Leaving out recorded event {} ({:?}): {}",
                event.sequence_number, event.event_type, reason
            );
            continue;
        }

        let repeats = previous.is_some_and(|p| {
            p.event_type == ActionType::Scroll
                && event.event_type == ActionType::Scroll
                && p.payload == event.payload
        });
        match actions.last_mut() {
            Some(last) if repeats => last.repeat_count += 1,
            _ => actions.push(action),
        }
        previous = Some(event);
    }
    actions
}

fn action_for(event: &OrderedEvent) -> ActionConfig {
    let payload = event.payload.clone();
    ActionConfig {
        resource_id: payload.resource_id,
        text: payload.text,
        coordinates: payload.coordinates,
        end_coordinates: payload.end_coordinates,
        direction: payload.direction,
        package_name: payload.package_name,
        key_code: payload.key_code,
        screenshot_ref: event.screenshot_ref.clone(),
        ..ActionConfig::new(event.event_type)
    }
}
