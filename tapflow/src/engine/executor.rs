//! Workflow interpreter

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::device::{DeviceActions, DeviceInspector};
use crate::engine::evaluate::evaluate;
use crate::engine::fsm::{NodeEvent, NodeFsm};
use crate::engine::outcome::{RunOutcome, RunStatus};
use crate::engine::random::{RandomSource, SeededRandom};
use crate::engine::services::{CompletionRequest, ExternalServices, WebhookRequest};
use crate::engine::sink::{NodeUpdate, StateSink};
use crate::engine::template::{interpolate, lookup};
use crate::errors::FlowError;
use crate::graph::WorkflowGraph;
use crate::models::workflow::{
    ActionConfig, Delay, ElementCheck, ErrorPolicy, LoopConfig, LoopSource, Node, NodeId,
    NodeKind, NodeVariant, OnTimeout, Port, WaitConfig,
};
use crate::utils::generate_uuid;

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Completion timeout of a gesture without its own `timeoutMs`
    pub action_timeout: Duration,

    /// Node visits after which a run is aborted
    pub max_steps: usize,

    /// Iteration bound of custom loops without `iterations`
    pub custom_loop_limit: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(15),
            max_steps: 10_000,
            custom_loop_limit: 100,
        }
    }
}

/// Inputs of a single run
pub struct RunContext {
    pub run_id: String,
    pub device_id: String,
    pub variables: HashMap<String, Value>,
    pub random: Box<dyn RandomSource>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            run_id: generate_uuid(),
            device_id: device_id.into(),
            variables: HashMap::new(),
            random: Box::new(SeededRandom::from_os()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_random(SeededRandom::seeded(seed))
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Walks a validated workflow with a single cursor
pub struct Executor {
    inspector: Arc<dyn DeviceInspector>,
    actions: Arc<dyn DeviceActions>,
    services: Arc<dyn ExternalServices>,
    sink: Arc<dyn StateSink>,
    options: ExecutorOptions,
}

enum Step {
    Follow {
        port: Port,
        iteration: Option<u32>,
    },
    TimedOut {
        message: String,
        fail: bool,
    },
}

fn follow(port: Port) -> Step {
    Step::Follow {
        port,
        iteration: None,
    }
}

struct LoopState {
    iteration: u32,
    limit: u32,
    items: Option<Vec<Value>>,
}

/// Mutable state owned by one run
struct Run {
    ctx: RunContext,
    fsms: HashMap<NodeId, NodeFsm>,
    loops: HashMap<NodeId, LoopState>,
    /// Loops whose body the cursor is currently inside, innermost last
    loop_stack: Vec<(NodeId, ErrorPolicy)>,
    steps: usize,
}

impl Run {
    fn new(graph: &WorkflowGraph, ctx: RunContext) -> Self {
        let fsms = graph
            .workflow()
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeFsm::new()))
            .collect();
        Self {
            ctx,
            fsms,
            loops: HashMap::new(),
            loop_stack: Vec::new(),
            steps: 0,
        }
    }

    fn enter_loop(&mut self, loop_id: &str, policy: ErrorPolicy) {
        if !self.loop_stack.iter().any(|(id, _)| id == loop_id) {
            self.loop_stack.push((loop_id.to_string(), policy));
        }
    }

    fn leave_loop(&mut self, loop_id: &str) {
        if let Some(pos) = self.loop_stack.iter().position(|(id, _)| id == loop_id) {
            for (abandoned, _) in self.loop_stack.drain(pos..) {
                self.loops.remove(&abandoned);
            }
        }
    }

    /// Forget the loops nested inside `loop_id`; their next visit starts afresh
    fn abandon_inner_loops(&mut self, loop_id: &str) {
        if let Some(pos) = self.loop_stack.iter().position(|(id, _)| id == loop_id) {
            for (inner, _) in self.loop_stack.drain(pos + 1..) {
                self.loops.remove(&inner);
            }
        }
    }

    /// Innermost enclosing loop that continues on error, abandoning the loops inside it
    fn unwind_to_skip_loop(&mut self, failed_node: &str) -> Option<NodeId> {
        if self.loop_stack.last().is_some_and(|(id, _)| id == failed_node) {
            self.leave_loop(failed_node);
        }
        let pos = self
            .loop_stack
            .iter()
            .rposition(|(_, policy)| *policy == ErrorPolicy::Skip)?;
        let loop_id = self.loop_stack[pos].0.clone();
        if pos + 1 < self.loop_stack.len() {
            let inner = self.loop_stack[pos + 1].0.clone();
            self.leave_loop(&inner);
        }
        Some(loop_id)
    }
}

impl Executor {
    pub fn new(
        inspector: Arc<dyn DeviceInspector>,
        actions: Arc<dyn DeviceActions>,
        services: Arc<dyn ExternalServices>,
        sink: Arc<dyn StateSink>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            inspector,
            actions,
            services,
            sink,
            options,
        }
    }

    /// Run `graph` to completion, failure or cancellation
    pub async fn run(&self, graph: &WorkflowGraph, ctx: RunContext) -> RunOutcome {
        info!(
            run_id = %ctx.run_id,
            workflow_id = %graph.id(),
            device_id = %ctx.device_id,
            "Run started"
        );

        self.actions.attach(&ctx.device_id).await;
        let mut run = Run::new(graph, ctx);
        let mut outcome = RunOutcome {
            run_id: run.ctx.run_id.clone(),
            workflow_id: graph.id().to_string(),
            status: RunStatus::Success,
            ended_at: None,
            failed_node: None,
            error_kind: None,
            message: None,
            variables: HashMap::new(),
            node_states: HashMap::new(),
            steps: 0,
        };

        let mut cursor = graph.entry().to_string();
        loop {
            if run.ctx.cancel.is_cancelled() {
                outcome.failure(&cursor, &FlowError::Cancelled("run cancelled".to_string()));
                break;
            }

            run.steps += 1;
            if run.steps > self.options.max_steps {
                let err = FlowError::Internal(format!(
                    "step budget of {} node visits exhausted",
                    self.options.max_steps
                ));
                error!("Run {} aborted: {}", run.ctx.run_id, err);
                outcome.failure(&cursor, &err);
                break;
            }

            let Some(node) = graph.node(&cursor) else {
                outcome.failure(&cursor, &FlowError::Internal(format!("unknown node {}", cursor)));
                break;
            };

            match self.visit(&mut run, graph, node).await {
                Ok(port) => match graph.next(&node.id, port) {
                    Some(next) => cursor = next.to_string(),
                    None if node.variant() == NodeVariant::Output => {
                        outcome.ended_at = Some(node.id.clone());
                        break;
                    }
                    None => {
                        let err = FlowError::Internal(format!(
                            "node {} has no edge on port {}",
                            node.id, port
                        ));
                        outcome.failure(&node.id, &err);
                        break;
                    }
                },
                Err(err) => {
                    if !matches!(err, FlowError::Cancelled(_)) {
                        if let Some(loop_id) = run.unwind_to_skip_loop(&node.id) {
                            warn!(
                                "Node {} failed ({}), loop {} continues with its next iteration",
                                node.id, err, loop_id
                            );
                            cursor = loop_id;
                            continue;
                        }
                    }
                    error!("Run {} failed at node {}: {}", run.ctx.run_id, node.id, err);
                    outcome.failure(&node.id, &err);
                    break;
                }
            }
        }

        self.actions.detach(&run.ctx.device_id).await;
        outcome.steps = run.steps;
        outcome.node_states = run
            .fsms
            .iter()
            .map(|(id, fsm)| (id.clone(), fsm.state()))
            .collect();
        outcome.variables = run.ctx.variables;

        info!(
            run_id = %outcome.run_id,
            status = ?outcome.status,
            steps = outcome.steps,
            "Run finished"
        );
        outcome
    }

    async fn visit(&self, run: &mut Run, graph: &WorkflowGraph, node: &Node) -> Result<Port, FlowError> {
        self.transition(run, &node.id, NodeEvent::Schedule, None, None);
        self.transition(run, &node.id, NodeEvent::Start, None, None);

        // a loop already iterating is not re-gated
        let gated = !(node.variant() == NodeVariant::Loop && run.loops.contains_key(&node.id));
        if gated && node.probability < 100 {
            let roll = run.ctx.random.roll_percent();
            if roll >= node.probability {
                debug!("Node {} skipped (roll {} >= {})", node.id, roll, node.probability);
                self.transition(
                    run,
                    &node.id,
                    NodeEvent::Succeed,
                    None,
                    Some("skipped".to_string()),
                );
                return Ok(node.variant().skip_port());
            }
        }

        let result = match self.apply_delay(run, node).await {
            Ok(()) => self.execute(run, graph, node).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Step::Follow { port, iteration }) => {
                self.transition(run, &node.id, NodeEvent::Succeed, iteration, None);
                Ok(port)
            }
            Ok(Step::TimedOut { message, fail }) => {
                self.transition(run, &node.id, NodeEvent::TimeOut, None, Some(message.clone()));
                if fail {
                    self.transition(run, &node.id, NodeEvent::Fail(message.clone()), None, Some(message.clone()));
                    Err(FlowError::Timeout(format!("wait node {}: {}", node.id, message)))
                } else {
                    Ok(Port::Default)
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.transition(run, &node.id, NodeEvent::Fail(message.clone()), None, Some(message));
                Err(err)
            }
        }
    }

    fn transition(
        &self,
        run: &mut Run,
        node_id: &str,
        event: NodeEvent,
        current_iteration: Option<u32>,
        message: Option<String>,
    ) {
        let fsm = run.fsms.entry(node_id.to_string()).or_default();
        if let Err(e) = fsm.process(event) {
            warn!("Node {}: {}", node_id, e);
            return;
        }
        self.sink.emit(NodeUpdate {
            run_id: run.ctx.run_id.clone(),
            node_id: node_id.to_string(),
            state: fsm.state(),
            current_iteration,
            message,
            at: Utc::now(),
        });
    }

    async fn apply_delay(&self, run: &mut Run, node: &Node) -> Result<(), FlowError> {
        let ms = match node.delay {
            Delay::None => return Ok(()),
            Delay::Fixed { fixed_ms } => fixed_ms,
            Delay::Random { min_ms, max_ms } => run.ctx.random.between(min_ms, max_ms),
        };
        if ms == 0 {
            return Ok(());
        }
        debug!("Delaying node {} by {}ms", node.id, ms);
        sleep_cancellable(&run.ctx.cancel, Duration::from_millis(ms)).await
    }

    // =============================== VARIANTS ================================== //

    async fn execute(&self, run: &mut Run, graph: &WorkflowGraph, node: &Node) -> Result<Step, FlowError> {
        let cancel = run.ctx.cancel.clone();

        match &node.kind {
            NodeKind::Input(config) => {
                for (name, value) in &config.variables {
                    run.ctx
                        .variables
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
                Ok(follow(Port::Default))
            }
            NodeKind::Output(_) => Ok(follow(Port::Default)),
            NodeKind::Action(config) => self.execute_action(run, config).await,
            NodeKind::Condition(config) => {
                let held = self
                    .check(run, &config.check, config.timeout_ms, config.use_cached_inspection)
                    .await?;
                debug!("Condition {} resolved to {}", node.id, held);
                Ok(follow(Port::from_bool(held)))
            }
            NodeKind::Assert(config) => {
                let held = self
                    .check(run, &config.check, config.timeout_ms, config.use_cached_inspection)
                    .await?;
                if !held && graph.next(&node.id, Port::False).is_none() {
                    return Err(FlowError::AssertionFailed(format!(
                        "{:?} check on node {} did not hold",
                        config.check.check_type, node.id
                    )));
                }
                Ok(follow(Port::from_bool(held)))
            }
            NodeKind::Loop(config) => self.execute_loop(run, node, config).await,
            NodeKind::Wait(config) => self.execute_wait(run, config).await,
            NodeKind::DataSource(config) => {
                let collection_id = interpolate(&config.collection_id, &run.ctx.variables);
                let value = cancellable(&cancel, self.services.fetch_collection(&collection_id)).await?;
                run.ctx.variables.insert(config.output_variable.clone(), value);
                Ok(follow(Port::Default))
            }
            NodeKind::TextInput(config) => {
                let text = interpolate(&config.text, &run.ctx.variables);
                run.ctx
                    .variables
                    .insert(config.output_variable.clone(), Value::String(text));
                Ok(follow(Port::Default))
            }
            NodeKind::FileInput(config) => {
                let path = interpolate(&config.path, &run.ctx.variables);
                let value = cancellable(&cancel, self.services.resolve_file(&path)).await?;
                run.ctx.variables.insert(config.output_variable.clone(), value);
                Ok(follow(Port::Default))
            }
            NodeKind::Webhook(config) => {
                let vars = &run.ctx.variables;
                let request = WebhookRequest {
                    method: config.method.clone(),
                    url: interpolate(&config.url, vars),
                    headers: config
                        .headers
                        .iter()
                        .map(|(k, v)| (k.clone(), interpolate(v, vars)))
                        .collect(),
                    body: config.body.as_ref().map(|b| interpolate(b, vars)),
                    timeout: Duration::from_millis(config.timeout_ms),
                };
                let value = cancellable(&cancel, self.services.call_webhook(&request)).await?;
                run.ctx.variables.insert(config.output_variable.clone(), value);
                Ok(follow(Port::Default))
            }
            NodeKind::AiAgent(config) => {
                let vars = &run.ctx.variables;
                let request = CompletionRequest {
                    prompt: interpolate(&config.prompt, vars),
                    system_prompt: config.system_prompt.as_ref().map(|s| interpolate(s, vars)),
                    model: config.model.clone(),
                };
                let text = cancellable(&cancel, self.services.complete(&request)).await?;
                run.ctx
                    .variables
                    .insert(config.output_variable.clone(), Value::String(text));
                Ok(follow(Port::Default))
            }
        }
    }

    async fn execute_action(&self, run: &Run, config: &ActionConfig) -> Result<Step, FlowError> {
        let vars = &run.ctx.variables;
        let action = ActionConfig {
            resource_id: config.resource_id.as_ref().map(|v| interpolate(v, vars)),
            text: config.text.as_ref().map(|v| interpolate(v, vars)),
            package_name: config.package_name.as_ref().map(|v| interpolate(v, vars)),
            ..config.clone()
        };
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.action_timeout);

        for _ in 0..config.repeat_count.max(1) {
            self.actions
                .perform(&run.ctx.device_id, &action, timeout, &run.ctx.cancel)
                .await?;
        }
        Ok(follow(Port::Default))
    }

    async fn check(
        &self,
        run: &Run,
        check: &ElementCheck,
        timeout_ms: Option<u64>,
        use_cache: bool,
    ) -> Result<bool, FlowError> {
        let check = ElementCheck {
            check_type: check.check_type,
            resource_id: check
                .resource_id
                .as_ref()
                .map(|v| interpolate(v, &run.ctx.variables)),
            text: check.text.as_ref().map(|v| interpolate(v, &run.ctx.variables)),
        };

        let cached = if use_cache {
            self.inspector.cached_inspection(&run.ctx.device_id)
        } else {
            None
        };
        let inspection = match cached {
            Some(inspection) => inspection,
            None => {
                self.inspector
                    .inspect(
                        &run.ctx.device_id,
                        timeout_ms.map(Duration::from_millis),
                        &run.ctx.cancel,
                    )
                    .await?
            }
        };
        Ok(evaluate(&check, &inspection))
    }

    async fn execute_loop(&self, run: &mut Run, node: &Node, config: &LoopConfig) -> Result<Step, FlowError> {
        run.abandon_inner_loops(&node.id);
        if !run.loops.contains_key(&node.id) {
            let state = match config.source {
                LoopSource::Count => LoopState {
                    iteration: 0,
                    limit: config.iterations.unwrap_or(0),
                    items: None,
                },
                LoopSource::Data => {
                    let items = bound_collection(run, config)?;
                    LoopState {
                        iteration: 0,
                        limit: u32::try_from(items.len()).unwrap_or(u32::MAX),
                        items: Some(items),
                    }
                }
                LoopSource::Custom => LoopState {
                    iteration: 0,
                    limit: config.iterations.unwrap_or(self.options.custom_loop_limit),
                    items: None,
                },
            };
            run.loops.insert(node.id.clone(), state);
        }

        let (iteration, limit) = match run.loops.get(&node.id) {
            Some(state) => (state.iteration, state.limit),
            None => (0, 0),
        };

        let mut proceed = iteration < limit;
        if proceed && config.source == LoopSource::Custom {
            if let Some(condition) = &config.condition {
                proceed = self.check(run, condition, None, false).await?;
            }
        }

        if !proceed {
            run.loops.remove(&node.id);
            run.leave_loop(&node.id);
            debug!("Loop {} complete after {} iteration(s)", node.id, iteration);
            return Ok(follow(Port::Complete));
        }

        let next = iteration + 1;
        let mut item = None;
        if let Some(state) = run.loops.get_mut(&node.id) {
            state.iteration = next;
            item = state
                .items
                .as_ref()
                .and_then(|items| items.get(iteration as usize).cloned());
        }
        if let Some(item) = item {
            let name = config.item_variable.clone().unwrap_or_else(|| "item".to_string());
            run.ctx.variables.insert(name, item);
        }
        if let Some(index_variable) = &config.index_variable {
            run.ctx
                .variables
                .insert(index_variable.clone(), json!(iteration));
        }

        run.enter_loop(&node.id, config.on_error);
        debug!("Loop {} iteration {}/{}", node.id, next, limit);
        Ok(Step::Follow {
            port: Port::Loop,
            iteration: Some(next),
        })
    }

    async fn execute_wait(&self, run: &mut Run, config: &WaitConfig) -> Result<Step, FlowError> {
        let cancel = run.ctx.cancel.clone();
        let timeout = Duration::from_millis(config.timeout_ms);

        let Some(condition) = &config.condition else {
            sleep_cancellable(&cancel, timeout).await?;
            return Ok(follow(Port::Default));
        };

        let deadline = Instant::now() + timeout;
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
            match self
                .check(run, condition, Some(remaining_ms.max(1)), config.use_cached_inspection)
                .await
            {
                Ok(true) => return Ok(follow(Port::Default)),
                Ok(false) => {}
                Err(e @ (FlowError::Timeout(_) | FlowError::RemoteError(_) | FlowError::Busy { .. })) => {
                    debug!("Wait poll unsatisfied: {}", e);
                }
                Err(e) => return Err(e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep_cancellable(&cancel, poll_interval.min(remaining)).await?;
        }

        Ok(Step::TimedOut {
            message: format!("condition not met within {}ms", config.timeout_ms),
            fail: config.on_timeout == OnTimeout::Fail,
        })
    }
}

fn bound_collection(run: &Run, config: &LoopConfig) -> Result<Vec<Value>, FlowError> {
    let name = config
        .collection_variable
        .as_deref()
        .unwrap_or_default()
        .trim()
        .trim_start_matches("{{")
        .trim_end_matches("}}")
        .trim();

    match lookup(&run.ctx.variables, name) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Err(FlowError::ValidationError(format!(
            "loop collection variable {} is not set",
            name
        ))),
        Some(other) => Err(FlowError::ValidationError(format!(
            "loop collection variable {} is not a list: {}",
            name, other
        ))),
    }
}

async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> Result<(), FlowError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FlowError::Cancelled("run cancelled".to_string())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, FlowError>>,
) -> Result<T, FlowError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FlowError::Cancelled("run cancelled".to_string())),
        result = future => result,
    }
}
