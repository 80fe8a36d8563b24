use crate::ids::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    /// Overrides the workspace's active environment while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(id: Id, workspace_id: Id, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            workspace_id,
            name: name.to_string(),
            environment_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// What a loop does when one of its iterations fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the failure and run the next iteration.
    Continue,
    /// Stop iterating; the loop itself succeeds.
    Break,
    /// Stop iterating; the loop fails.
    #[default]
    Abort,
}

fn default_item_name() -> String {
    "item".to_string()
}

fn default_index_name() -> String {
    "index".to_string()
}

/// Kind-specific node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeConfig {
    ManualStart,
    Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_id: Option<Id>,
        #[serde(default)]
        continue_on_failure: bool,
    },
    For {
        /// Expression yielding the iteration count.
        iterations: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_alias: Option<String>,
        #[serde(default)]
        error_policy: ErrorPolicy,
    },
    ForEach {
        /// Expression yielding an array or object.
        collection: String,
        #[serde(default = "default_item_name")]
        item_name: String,
        #[serde(default = "default_index_name")]
        index_name: String,
        #[serde(default)]
        error_policy: ErrorPolicy,
        #[serde(default)]
        parallel: bool,
    },
    Condition {
        expression: String,
    },
    Script {
        source: String,
    },
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    ManualStart,
    Request,
    For,
    ForEach,
    Condition,
    Script,
    NoOp,
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::ManualStart => NodeKind::ManualStart,
            NodeConfig::Request { .. } => NodeKind::Request,
            NodeConfig::For { .. } => NodeKind::For,
            NodeConfig::ForEach { .. } => NodeKind::ForEach,
            NodeConfig::Condition { .. } => NodeKind::Condition,
            NodeConfig::Script { .. } => NodeKind::Script,
            NodeConfig::NoOp => NodeKind::NoOp,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, NodeConfig::For { .. } | NodeConfig::ForEach { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub flow_id: Id,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: Id, flow_id: Id, name: &str, config: NodeConfig) -> Self {
        Self {
            id,
            flow_id,
            name: name.to_string(),
            position: Position::default(),
            config,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.config, NodeConfig::ManualStart)
    }
}

/// Which successor path an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeHandle {
    #[default]
    Default,
    True,
    False,
    LoopBody,
    LoopAfter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub flow_id: Id,
    pub source_id: Id,
    pub target_id: Id,
    #[serde(default)]
    pub handle: EdgeHandle,
}

impl Edge {
    pub fn new(id: Id, flow_id: Id, source_id: Id, target_id: Id, handle: EdgeHandle) -> Self {
        Self {
            id,
            flow_id,
            source_id,
            target_id,
            handle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVariable {
    pub id: Id,
    pub flow_id: Id,
    pub key: String,
    pub value: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_order: f64,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Success,
    Failed,
    Skipped,
    Canceled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowRunStatus {
    Started,
    Succeeded,
    Failed,
    Canceled,
}

/// One activation of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: Id,
    pub run_id: Id,
    pub flow_id: Id,
    pub node_id: Id,
    pub name: String,
    pub status: NodeStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
