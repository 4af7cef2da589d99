//! Structural validation of workflow graphs

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::StructuralError;
use crate::models::workflow::{
    ActionConfig, ActionType, Delay, Edge, LoopSource, Node, NodeKind, NodeVariant, Port, Workflow,
};

/// Outcome of [`validate`]
pub type ValidationResult = Result<(), StructuralError>;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Validate a workflow graph and every node's configuration.
///
/// Pure inspection: the workflow is never modified.
pub fn validate(workflow: &Workflow) -> ValidationResult {
    // 1. Node identity and configuration
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(StructuralError::DuplicateNode(node.id.clone()));
        }
        validate_node_config(node)?;
    }

    // 2. Entry and exits
    let entry = topological_entry(workflow)?;
    if workflow.nodes_of(NodeVariant::Output).next().is_none() {
        return Err(StructuralError::MissingOutput);
    }

    // 3. Edges and ports
    let variants: HashMap<&str, NodeVariant> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.variant()))
        .collect();

    let mut wired: HashSet<(&str, Port)> = HashSet::new();
    for edge in &workflow.edges {
        let source_variant = match variants.get(edge.source.as_str()) {
            Some(v) => *v,
            None => {
                return Err(StructuralError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: edge.source.clone(),
                })
            }
        };
        if !variants.contains_key(edge.target.as_str()) {
            return Err(StructuralError::DanglingEdge {
                edge: edge.id.clone(),
                node: edge.target.clone(),
            });
        }
        if !source_variant.ports().contains(&edge.source_port) {
            return Err(StructuralError::InvalidPort {
                node: edge.source.clone(),
                port: edge.source_port,
            });
        }
        if !wired.insert((edge.source.as_str(), edge.source_port)) {
            return Err(StructuralError::DuplicatePortEdge {
                node: edge.source.clone(),
                port: edge.source_port,
            });
        }
    }

    for node in &workflow.nodes {
        for port in node.variant().required_ports() {
            if !wired.contains(&(node.id.as_str(), *port)) {
                return Err(StructuralError::UnwiredPort {
                    node: node.id.clone(),
                    port: *port,
                });
            }
        }
    }

    // 4. Every non-Input node is fed and reachable from the entry
    let targeted: HashSet<&str> = workflow.edges.iter().map(|e| e.target.as_str()).collect();
    for node in &workflow.nodes {
        if node.variant() != NodeVariant::Input && !targeted.contains(node.id.as_str()) {
            return Err(StructuralError::OrphanNode(node.id.clone()));
        }
    }

    let reachable = reachable_from(&entry.id, &workflow.edges);
    if let Some(node) = workflow
        .nodes
        .iter()
        .find(|n| !reachable.contains(n.id.as_str()))
    {
        return Err(StructuralError::OrphanNode(node.id.clone()));
    }

    // 5. Cycles may only close through a Loop node's loop port
    detect_illegal_cycle(workflow, &variants)?;

    // 6. Every path can still end at an Output
    let finishing = reaching_output(workflow);
    if let Some(node) = workflow
        .nodes
        .iter()
        .find(|n| !finishing.contains(n.id.as_str()))
    {
        return Err(StructuralError::UnreachableOutput(node.id.clone()));
    }

    Ok(())
}

/// The single Input node that every run starts from
pub fn topological_entry(workflow: &Workflow) -> Result<&Node, StructuralError> {
    let mut inputs = workflow.nodes_of(NodeVariant::Input);
    let entry = inputs.next().ok_or(StructuralError::MissingInput)?;
    let extra = inputs.count();
    if extra > 0 {
        return Err(StructuralError::MultipleInputs(extra + 1));
    }
    Ok(entry)
}

/// The edge leaving `node_id` on `port`, if wired
pub fn outgoing<'a>(workflow: &'a Workflow, node_id: &str, port: Port) -> Option<&'a Edge> {
    workflow
        .edges
        .iter()
        .find(|e| e.source == node_id && e.source_port == port)
}

fn reachable_from<'a>(start: &'a str, edges: &'a [Edge]) -> HashSet<&'a str> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        for edge in edges.iter().filter(|e| e.source == current) {
            queue.push_back(edge.target.as_str());
        }
    }
    visited
}

fn reaching_output(workflow: &Workflow) -> HashSet<&str> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<&str> = workflow
        .nodes_of(NodeVariant::Output)
        .map(|n| n.id.as_str())
        .collect();
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        for edge in workflow.edges.iter().filter(|e| e.target == current) {
            queue.push_back(edge.source.as_str());
        }
    }
    visited
}

/// Iterative three-colour DFS over the graph minus Loop `loop` edges.
fn detect_illegal_cycle(
    workflow: &Workflow,
    variants: &HashMap<&str, NodeVariant>,
) -> ValidationResult {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &workflow.edges {
        let is_loop_back = edge.source_port == Port::Loop
            && variants.get(edge.source.as_str()) == Some(&NodeVariant::Loop);
        if !is_loop_back {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    let mut marks: HashMap<&str, Mark> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Mark::Unvisited))
        .collect();

    for node in &workflow.nodes {
        if marks.get(node.id.as_str()) != Some(&Mark::Unvisited) {
            continue;
        }

        let mut stack: Vec<(&str, usize)> = vec![(node.id.as_str(), 0)];
        marks.insert(node.id.as_str(), Mark::InProgress);

        while let Some((current, next_child)) = stack.pop() {
            let children = adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(child) = children.get(next_child) {
                stack.push((current, next_child + 1));
                match marks.get(child).copied().unwrap_or(Mark::Done) {
                    Mark::InProgress => {
                        return Err(StructuralError::IllegalCycle(child.to_string()));
                    }
                    Mark::Unvisited => {
                        marks.insert(child, Mark::InProgress);
                        stack.push((child, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks.insert(current, Mark::Done);
            }
        }
    }

    Ok(())
}

/// Why an Action node's configuration cannot be replayed, if it cannot
pub fn action_problem(config: &ActionConfig) -> Option<&'static str> {
    if config.repeat_count == 0 {
        return Some("repeatCount must be at least 1");
    }
    let has_target =
        config.resource_id.is_some() || config.text.is_some() || config.coordinates.is_some();
    match config.action {
        ActionType::Tap | ActionType::LongPress | ActionType::DoubleTap if !has_target => {
            Some("gesture needs a resourceId, text or coordinates")
        }
        ActionType::Swipe
            if config.direction.is_none()
                && (config.coordinates.is_none() || config.end_coordinates.is_none()) =>
        {
            Some("swipe needs a direction or start and end coordinates")
        }
        ActionType::TypeText if config.text.is_none() => Some("type_text needs text"),
        ActionType::LaunchApp if config.package_name.is_none() => {
            Some("launch_app needs a packageName")
        }
        ActionType::KeyEvent if config.key_code.is_none() => Some("key_event needs a keyCode"),
        _ => None,
    }
}

fn validate_node_config(node: &Node) -> ValidationResult {
    let invalid = |reason: &str| StructuralError::InvalidConfig {
        node: node.id.clone(),
        reason: reason.to_string(),
    };

    if node.probability > 100 {
        return Err(invalid("probability must be between 0 and 100"));
    }
    if let Delay::Random { min_ms, max_ms } = node.delay {
        if min_ms > max_ms {
            return Err(invalid("random delay minMs exceeds maxMs"));
        }
    }

    match &node.kind {
        NodeKind::Input(_) | NodeKind::Output(_) => {}
        NodeKind::Action(config) => {
            if let Some(reason) = action_problem(config) {
                return Err(invalid(reason));
            }
        }
        NodeKind::Condition(config) | NodeKind::Assert(config) => {
            validate_check(&config.check).map_err(|r| invalid(r))?;
        }
        NodeKind::Loop(config) => match config.source {
            LoopSource::Count if config.iterations.is_none() => {
                return Err(invalid("count loop needs iterations"));
            }
            LoopSource::Data if config.collection_variable.is_none() => {
                return Err(invalid("data loop needs a collectionVariable"));
            }
            LoopSource::Custom => match &config.condition {
                Some(check) => validate_check(check).map_err(|r| invalid(r))?,
                None => return Err(invalid("custom loop needs a condition")),
            },
            _ => {}
        },
        NodeKind::Wait(config) => {
            if config.poll_interval_ms == 0 {
                return Err(invalid("pollIntervalMs must be positive"));
            }
            if let Some(check) = &config.condition {
                validate_check(check).map_err(|r| invalid(r))?;
            }
        }
        NodeKind::DataSource(config) => {
            if config.collection_id.trim().is_empty() {
                return Err(invalid("collectionId is empty"));
            }
            require_variable(&config.output_variable).map_err(|r| invalid(r))?;
        }
        NodeKind::AiAgent(config) => {
            if config.prompt.trim().is_empty() {
                return Err(invalid("prompt is empty"));
            }
            require_variable(&config.output_variable).map_err(|r| invalid(r))?;
        }
        NodeKind::TextInput(config) => {
            require_variable(&config.output_variable).map_err(|r| invalid(r))?;
        }
        NodeKind::FileInput(config) => {
            if config.path.trim().is_empty() {
                return Err(invalid("path is empty"));
            }
            require_variable(&config.output_variable).map_err(|r| invalid(r))?;
        }
        NodeKind::Webhook(config) => {
            if config.url.trim().is_empty() {
                return Err(invalid("url is empty"));
            }
            if !HTTP_METHODS.contains(&config.method.to_uppercase().as_str()) {
                return Err(invalid("unsupported HTTP method"));
            }
            require_variable(&config.output_variable).map_err(|r| invalid(r))?;
        }
    }

    Ok(())
}

fn validate_check(check: &crate::models::workflow::ElementCheck) -> Result<(), &'static str> {
    use crate::models::workflow::CheckType;

    if check.resource_id.is_none() && check.text.is_none() {
        return Err("check needs a resourceId or text");
    }
    if matches!(check.check_type, CheckType::TextEquals | CheckType::Contains)
        && check.text.is_none()
    {
        return Err("text comparison needs text");
    }
    Ok(())
}

fn require_variable(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        Err("outputVariable is empty")
    } else {
        Ok(())
    }
}
