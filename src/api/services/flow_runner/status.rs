//! Status events emitted while a flow runs.

use crate::ids::Id;
use crate::models::{FlowRunStatus, NodeStatus};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatusEvent {
    pub run_id: Id,
    pub flow_id: Id,
    pub node_id: Id,
    pub name: String,
    pub status: NodeStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStatusEvent {
    pub run_id: Id,
    pub flow_id: Id,
    pub status: FlowRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sending halves of the node and flow status channels.
///
/// Sends wait for buffer space; a dropped receiver silently discards events.
#[derive(Clone)]
pub struct RunReporter {
    nodes: mpsc::Sender<NodeStatusEvent>,
    flow: mpsc::Sender<FlowStatusEvent>,
}

pub struct RunReceivers {
    pub nodes: mpsc::Receiver<NodeStatusEvent>,
    pub flow: mpsc::Receiver<FlowStatusEvent>,
}

impl RunReporter {
    pub fn channel(buffer: usize) -> (Self, RunReceivers) {
        let (node_tx, node_rx) = mpsc::channel(buffer.max(1));
        let (flow_tx, flow_rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                nodes: node_tx,
                flow: flow_tx,
            },
            RunReceivers {
                nodes: node_rx,
                flow: flow_rx,
            },
        )
    }

    pub async fn node(&self, event: NodeStatusEvent) {
        let _ = self.nodes.send(event).await;
    }

    pub async fn flow(&self, event: FlowStatusEvent) {
        let _ = self.flow.send(event).await;
    }
}

impl RunReceivers {
    /// Drain both channels until the run's senders are gone.
    pub async fn collect(mut self) -> (Vec<NodeStatusEvent>, Vec<FlowStatusEvent>) {
        let mut nodes = Vec::new();
        let mut flows = Vec::new();
        let (mut nodes_open, mut flow_open) = (true, true);
        while nodes_open || flow_open {
            tokio::select! {
                event = self.nodes.recv(), if nodes_open => match event {
                    Some(e) => nodes.push(e),
                    None => nodes_open = false,
                },
                event = self.flow.recv(), if flow_open => match event {
                    Some(e) => flows.push(e),
                    None => flow_open = false,
                },
            }
        }
        (nodes, flows)
    }
}
