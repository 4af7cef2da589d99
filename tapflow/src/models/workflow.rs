//! Workflow models

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node identifier, unique within one workflow
pub type NodeId = String;

/// A workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow ID
    #[serde(default)]
    pub id: String,

    /// Workflow name
    #[serde(default)]
    pub name: String,

    /// Steps of the workflow
    pub nodes: Vec<Node>,

    /// Directed links between steps
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Look up a node by ID
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All nodes of the given variant
    pub fn nodes_of(&self, variant: NodeVariant) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.variant() == variant)
    }
}

/// A step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node ID
    pub id: NodeId,

    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Variant tag plus its configuration
    #[serde(flatten)]
    pub kind: NodeKind,

    /// Chance (0-100) that the node executes when reached
    #[serde(default = "default_probability")]
    pub probability: u8,

    /// Suspension applied before execution
    #[serde(default)]
    pub delay: Delay,
}

fn default_probability() -> u8 {
    100
}

impl Node {
    /// Create a node with default probability and no delay
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: None,
            kind,
            probability: default_probability(),
            delay: Delay::None,
        }
    }

    pub fn with_probability(mut self, probability: u8) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn variant(&self) -> NodeVariant {
        self.kind.variant()
    }
}

/// Node variant with its closed set of configuration fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Input(InputConfig),
    Output(OutputConfig),
    Action(ActionConfig),
    Condition(ConditionConfig),
    Assert(ConditionConfig),
    Loop(LoopConfig),
    Wait(WaitConfig),
    DataSource(DataSourceConfig),
    AiAgent(AiAgentConfig),
    TextInput(TextInputConfig),
    FileInput(FileInputConfig),
    Webhook(WebhookConfig),
}

impl NodeKind {
    pub fn variant(&self) -> NodeVariant {
        match self {
            NodeKind::Input(_) => NodeVariant::Input,
            NodeKind::Output(_) => NodeVariant::Output,
            NodeKind::Action(_) => NodeVariant::Action,
            NodeKind::Condition(_) => NodeVariant::Condition,
            NodeKind::Assert(_) => NodeVariant::Assert,
            NodeKind::Loop(_) => NodeVariant::Loop,
            NodeKind::Wait(_) => NodeVariant::Wait,
            NodeKind::DataSource(_) => NodeVariant::DataSource,
            NodeKind::AiAgent(_) => NodeVariant::AiAgent,
            NodeKind::TextInput(_) => NodeVariant::TextInput,
            NodeKind::FileInput(_) => NodeVariant::FileInput,
            NodeKind::Webhook(_) => NodeVariant::Webhook,
        }
    }
}

/// Node variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVariant {
    Action,
    Condition,
    Loop,
    Assert,
    Wait,
    DataSource,
    AiAgent,
    TextInput,
    FileInput,
    Webhook,
    Input,
    Output,
}

impl NodeVariant {
    /// Ports a node of this variant may have outgoing edges on
    pub fn ports(&self) -> &'static [Port] {
        match self {
            NodeVariant::Condition | NodeVariant::Assert => &[Port::True, Port::False],
            NodeVariant::Loop => &[Port::Loop, Port::Complete],
            _ => &[Port::Default],
        }
    }

    /// Ports that must be wired for the graph to be valid
    pub fn required_ports(&self) -> &'static [Port] {
        match self {
            NodeVariant::Condition => &[Port::True, Port::False],
            NodeVariant::Assert => &[Port::True],
            NodeVariant::Loop => &[Port::Loop, Port::Complete],
            NodeVariant::Output => &[],
            _ => &[Port::Default],
        }
    }

    /// Port followed when the node is skipped by probability gating
    pub fn skip_port(&self) -> Port {
        match self {
            NodeVariant::Condition | NodeVariant::Assert => Port::True,
            NodeVariant::Loop => Port::Complete,
            _ => Port::Default,
        }
    }
}

impl fmt::Display for NodeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeVariant::Action => "action",
            NodeVariant::Condition => "condition",
            NodeVariant::Loop => "loop",
            NodeVariant::Assert => "assert",
            NodeVariant::Wait => "wait",
            NodeVariant::DataSource => "data_source",
            NodeVariant::AiAgent => "ai_agent",
            NodeVariant::TextInput => "text_input",
            NodeVariant::FileInput => "file_input",
            NodeVariant::Webhook => "webhook",
            NodeVariant::Input => "input",
            NodeVariant::Output => "output",
        };
        f.write_str(name)
    }
}

/// Named exit of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    #[default]
    Default,
    True,
    False,
    Loop,
    Complete,
}

impl Port {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Port::True
        } else {
            Port::False
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Port::Default => "default",
            Port::True => "true",
            Port::False => "false",
            Port::Loop => "loop",
            Port::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Directed link from a node port to another node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge ID
    #[serde(default)]
    pub id: String,

    /// Source node ID
    pub source: NodeId,

    /// Exit port on the source node
    #[serde(default, alias = "sourceHandle")]
    pub source_port: Port,

    /// Target node ID
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, source_port: Port, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}:{}->{}", source, source_port, target),
            source,
            source_port,
            target,
        }
    }
}

/// Suspension applied before a node executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Delay {
    #[default]
    None,
    Fixed {
        #[serde(rename = "fixedMs")]
        fixed_ms: u64,
    },
    Random {
        #[serde(rename = "minMs")]
        min_ms: u64,
        #[serde(rename = "maxMs")]
        max_ms: u64,
    },
}

/// Per-node lifecycle value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    #[default]
    Idle,
    Pending,
    Running,
    Success,
    Error,
    Timeout,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Success | ExecutionState::Error | ExecutionState::Timeout
        )
    }
}

// =============================== NODE CONFIGS ================================== //

/// Entry node; seeds the run's variables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConfig {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// Terminal node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Device gesture kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Tap,
    LongPress,
    DoubleTap,
    Swipe,
    Scroll,
    TypeText,
    Back,
    Home,
    LaunchApp,
    KeyEvent,
}

/// Scroll/swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Screen coordinates in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Device gesture executed through the device-execute channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub action: ActionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Target text, or the text to type for `type_text`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_coordinates: Option<Point>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<i32>,

    /// How many times the gesture is repeated
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,

    /// Completion timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
}

fn default_repeat_count() -> u32 {
    1
}

impl ActionConfig {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            resource_id: None,
            text: None,
            coordinates: None,
            end_coordinates: None,
            direction: None,
            package_name: None,
            key_code: None,
            repeat_count: default_repeat_count(),
            timeout_ms: None,
            screenshot_ref: None,
        }
    }
}

/// Predicate evaluated against an inspection result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Exists,
    NotExists,
    TextEquals,
    Contains,
    Visible,
}

/// Element lookup plus the predicate applied to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementCheck {
    pub check_type: CheckType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ElementCheck {
    pub fn by_resource_id(check_type: CheckType, resource_id: impl Into<String>) -> Self {
        Self {
            check_type,
            resource_id: Some(resource_id.into()),
            text: None,
        }
    }

    pub fn by_text(check_type: CheckType, text: impl Into<String>) -> Self {
        Self {
            check_type,
            resource_id: None,
            text: Some(text.into()),
        }
    }
}

/// Condition and Assert configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(flatten)]
    pub check: ElementCheck,

    /// Inspection timeout override
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Reuse the device's latest inspection when it is fresh enough
    #[serde(default)]
    pub use_cached_inspection: bool,
}

impl ConditionConfig {
    pub fn new(check: ElementCheck) -> Self {
        Self {
            check,
            timeout_ms: None,
            use_cached_inspection: false,
        }
    }
}

/// Where a loop's iterations come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopSource {
    Data,
    Custom,
    Count,
}

/// What a loop does when a node in its body fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub source: LoopSource,

    /// Iteration count for `count`, upper bound for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,

    /// Variable holding the collection for `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_variable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_variable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_variable: Option<String>,

    /// Continue-while predicate for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ElementCheck>,

    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl LoopConfig {
    pub fn count(iterations: u32) -> Self {
        Self {
            source: LoopSource::Count,
            iterations: Some(iterations),
            collection_variable: None,
            item_variable: None,
            index_variable: None,
            condition: None,
            on_error: ErrorPolicy::Fail,
        }
    }

    pub fn over(collection_variable: impl Into<String>, item_variable: impl Into<String>) -> Self {
        Self {
            source: LoopSource::Data,
            iterations: None,
            collection_variable: Some(collection_variable.into()),
            item_variable: Some(item_variable.into()),
            index_variable: None,
            condition: None,
            on_error: ErrorPolicy::Fail,
        }
    }
}

/// What a Wait node does once its timeout is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnTimeout {
    Skip,
    #[default]
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    /// Awaited element; a plain pause when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ElementCheck>,

    #[serde(default = "default_wait_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub on_timeout: OnTimeout,

    #[serde(default)]
    pub use_cached_inspection: bool,
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl WaitConfig {
    pub fn for_element(condition: ElementCheck, timeout_ms: u64, on_timeout: OnTimeout) -> Self {
        Self {
            condition: Some(condition),
            timeout_ms,
            poll_interval_ms: default_poll_interval_ms(),
            on_timeout,
            use_cached_inspection: false,
        }
    }
}

/// Fetches a data collection into a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub collection_id: String,
    pub output_variable: String,
}

/// Model completion into a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAgentConfig {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub output_variable: String,
}

/// Literal (interpolated) text into a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputConfig {
    pub text: String,
    pub output_variable: String,
}

/// File path into a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInputConfig {
    pub path: String,
    pub output_variable: String,
}

/// HTTP call whose response lands in a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    pub output_variable: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_webhook_timeout_ms() -> u64 {
    30_000
}
