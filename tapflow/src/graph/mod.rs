//! Validated, indexed view of a workflow

pub mod validator;

use std::collections::HashMap;

pub use validator::{action_problem, outgoing, topological_entry, validate, ValidationResult};

use crate::errors::StructuralError;
use crate::models::workflow::{Node, NodeId, Port, Workflow};

/// A workflow that passed [`validate`], indexed for traversal.
///
/// Only constructible through [`WorkflowGraph::new`], so an invalid graph
/// can never reach the executor.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    workflow: Workflow,
    entry: NodeId,
    nodes: HashMap<NodeId, usize>,
    next: HashMap<(NodeId, Port), NodeId>,
}

impl WorkflowGraph {
    pub fn new(workflow: Workflow) -> Result<Self, StructuralError> {
        validate(&workflow)?;
        let entry = topological_entry(&workflow)?.id.clone();

        let nodes = workflow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let next = workflow
            .edges
            .iter()
            .map(|e| ((e.source.clone(), e.source_port), e.target.clone()))
            .collect();

        Ok(Self {
            workflow,
            entry,
            nodes,
            next,
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn id(&self) -> &str {
        &self.workflow.id
    }

    /// ID of the Input node
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id).map(|i| &self.workflow.nodes[*i])
    }

    /// Target of the edge leaving `id` on `port`
    pub fn next(&self, id: &str, port: Port) -> Option<&str> {
        self.next
            .get(&(id.to_string(), port))
            .map(String::as_str)
    }
}
