//! Flows, nodes, edges, flow variables and node execution records.

use super::memory::{Tables, insert_unique, replace_existing, require};
use super::ordering::cmp_order;
use super::StorageError;
use crate::ids::Id;
use crate::models::{Edge, Flow, FlowVariable, Node, NodeExecution};

impl Tables {
    pub fn get_flow(&self, id: Id) -> Option<Flow> {
        self.flows.get(&id).cloned()
    }

    pub fn list_flows(&self, workspace_id: Id) -> Vec<Flow> {
        self.flows
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    pub fn create_flow(&mut self, flow: Flow) -> Result<(), StorageError> {
        require(&self.workspaces, flow.workspace_id, "flow", "workspace")?;
        if let Some(env_id) = flow.environment_id {
            require(&self.environments, env_id, "flow", "environment")?;
        }
        insert_unique(&mut self.flows, flow.id, flow, "flow")
    }

    pub fn update_flow(&mut self, flow: Flow) -> Result<(), StorageError> {
        if let Some(env_id) = flow.environment_id {
            require(&self.environments, env_id, "flow", "environment")?;
        }
        replace_existing(&mut self.flows, flow.id, flow, "flow")
    }

    /// Removes the flow with its nodes, edges, variables, executions and tree entry.
    pub fn delete_flow(&mut self, id: Id) -> Result<Flow, StorageError> {
        let flow = self
            .flows
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("flow", id))?;
        self.nodes.retain(|_, n| n.flow_id != id);
        self.edges.retain(|_, e| e.flow_id != id);
        self.flow_variables.retain(|_, v| v.flow_id != id);
        self.node_executions.retain(|_, x| x.flow_id != id);
        self.files.retain(|_, f| f.content_id != Some(id));
        Ok(flow)
    }

    pub fn get_node(&self, id: Id) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }

    pub fn list_nodes(&self, flow_id: Id) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| n.flow_id == flow_id)
            .cloned()
            .collect()
    }

    pub fn create_node(&mut self, node: Node) -> Result<(), StorageError> {
        require(&self.flows, node.flow_id, "node", "flow")?;
        if node.is_start()
            && self
                .nodes
                .values()
                .any(|n| n.flow_id == node.flow_id && n.is_start())
        {
            return Err(StorageError::conflict("node", "flow already has a start node"));
        }
        insert_unique(&mut self.nodes, node.id, node, "node")
    }

    pub fn update_node(&mut self, node: Node) -> Result<(), StorageError> {
        match self.nodes.get(&node.id) {
            Some(existing) if existing.is_start() != node.is_start() => {
                return Err(StorageError::invalid("node", "cannot change start node kind"));
            }
            Some(existing) if existing.flow_id != node.flow_id => {
                return Err(StorageError::invalid("node", "cannot move node between flows"));
            }
            _ => {}
        }
        replace_existing(&mut self.nodes, node.id, node, "node")
    }

    /// Deletes the node and every edge touching it; returns the removed edges.
    pub fn delete_node(&mut self, id: Id) -> Result<(Node, Vec<Edge>), StorageError> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("node", id))?;
        let touching: Vec<Id> = self
            .edges
            .values()
            .filter(|e| e.source_id == id || e.target_id == id)
            .map(|e| e.id)
            .collect();
        let edges = touching
            .iter()
            .filter_map(|eid| self.edges.remove(eid))
            .collect();
        Ok((node, edges))
    }

    pub fn get_edge(&self, id: Id) -> Option<Edge> {
        self.edges.get(&id).cloned()
    }

    pub fn list_edges(&self, flow_id: Id) -> Vec<Edge> {
        self.edges
            .values()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect()
    }

    /// Inserts an edge. Cycle checks belong to the caller, which has the whole graph.
    pub fn create_edge(&mut self, edge: Edge) -> Result<(), StorageError> {
        require(&self.flows, edge.flow_id, "edge", "flow")?;
        for endpoint in [edge.source_id, edge.target_id] {
            match self.nodes.get(&endpoint) {
                Some(n) if n.flow_id == edge.flow_id => {}
                Some(_) => {
                    return Err(StorageError::invalid("edge", "endpoint is in another flow"));
                }
                None => {
                    return Err(StorageError::referential(
                        "edge",
                        format!("node {} does not exist", endpoint),
                    ));
                }
            }
        }
        if edge.source_id == edge.target_id {
            return Err(StorageError::invalid("edge", "self loops are not allowed"));
        }
        if self.edges.values().any(|e| {
            e.source_id == edge.source_id && e.target_id == edge.target_id && e.handle == edge.handle
        }) {
            return Err(StorageError::conflict("edge", "duplicate edge"));
        }
        insert_unique(&mut self.edges, edge.id, edge, "edge")
    }

    pub fn delete_edge(&mut self, id: Id) -> Result<Edge, StorageError> {
        self.edges
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("edge", id))
    }

    pub fn get_flow_variable(&self, id: Id) -> Option<FlowVariable> {
        self.flow_variables.get(&id).cloned()
    }

    pub fn list_flow_variables(&self, flow_id: Id) -> Vec<FlowVariable> {
        let mut out: Vec<FlowVariable> = self
            .flow_variables
            .values()
            .filter(|v| v.flow_id == flow_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| cmp_order((a.display_order, a.id), (b.display_order, b.id)));
        out
    }

    pub fn create_flow_variable(&mut self, variable: FlowVariable) -> Result<(), StorageError> {
        require(&self.flows, variable.flow_id, "flow_variable", "flow")?;
        insert_unique(&mut self.flow_variables, variable.id, variable, "flow_variable")
    }

    pub fn update_flow_variable(&mut self, variable: FlowVariable) -> Result<(), StorageError> {
        replace_existing(&mut self.flow_variables, variable.id, variable, "flow_variable")
    }

    pub fn delete_flow_variable(&mut self, id: Id) -> Result<FlowVariable, StorageError> {
        self.flow_variables
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("flow_variable", id))
    }

    /// Inserts or replaces an execution record.
    pub fn upsert_node_execution(&mut self, execution: NodeExecution) -> Result<(), StorageError> {
        require(&self.flows, execution.flow_id, "node_execution", "flow")?;
        self.node_executions.insert(execution.id, execution);
        Ok(())
    }

    pub fn list_node_executions(&self, flow_id: Id) -> Vec<NodeExecution> {
        self.node_executions
            .values()
            .filter(|x| x.flow_id == flow_id)
            .cloned()
            .collect()
    }

    pub fn list_run_executions(&self, run_id: Id) -> Vec<NodeExecution> {
        self.node_executions
            .values()
            .filter(|x| x.run_id == run_id)
            .cloned()
            .collect()
    }
}
