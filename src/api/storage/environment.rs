//! Environments and their variables.

use super::memory::{Tables, insert_unique, replace_existing, require};
use super::ordering::cmp_order;
use super::StorageError;
use crate::ids::Id;
use crate::models::{Environment, Variable};
use std::collections::HashMap;

impl Tables {
    pub fn get_environment(&self, id: Id) -> Option<Environment> {
        self.environments.get(&id).cloned()
    }

    pub fn list_environments(&self, workspace_id: Id) -> Vec<Environment> {
        let mut out: Vec<Environment> = self
            .environments
            .values()
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| cmp_order((a.display_order, a.id), (b.display_order, b.id)));
        out
    }

    pub fn create_environment(&mut self, env: Environment) -> Result<(), StorageError> {
        require(&self.workspaces, env.workspace_id, "environment", "workspace")?;
        insert_unique(&mut self.environments, env.id, env, "environment")
    }

    pub fn update_environment(&mut self, env: Environment) -> Result<(), StorageError> {
        replace_existing(&mut self.environments, env.id, env, "environment")
    }

    /// Deletes the environment and its variables, clearing any reference to it.
    pub fn delete_environment(&mut self, id: Id) -> Result<Environment, StorageError> {
        let env = self
            .environments
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("environment", id))?;
        self.variables.retain(|_, v| v.environment_id != id);
        for ws in self.workspaces.values_mut() {
            if ws.active_env_id == Some(id) {
                ws.active_env_id = None;
            }
        }
        for flow in self.flows.values_mut() {
            if flow.environment_id == Some(id) {
                flow.environment_id = None;
            }
        }
        Ok(env)
    }

    pub fn get_variable(&self, id: Id) -> Option<Variable> {
        self.variables.get(&id).cloned()
    }

    pub fn list_variables(&self, environment_id: Id) -> Vec<Variable> {
        let mut out: Vec<Variable> = self
            .variables
            .values()
            .filter(|v| v.environment_id == environment_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| cmp_order((a.display_order, a.id), (b.display_order, b.id)));
        out
    }

    /// Variables of every environment in the workspace, keyed by environment.
    pub fn variables_by_environment(&self, workspace_id: Id) -> HashMap<Id, Vec<Variable>> {
        let mut out: HashMap<Id, Vec<Variable>> = HashMap::new();
        for env in self.list_environments(workspace_id) {
            out.insert(env.id, self.list_variables(env.id));
        }
        out
    }

    pub fn create_variable(&mut self, variable: Variable) -> Result<(), StorageError> {
        require(
            &self.environments,
            variable.environment_id,
            "variable",
            "environment",
        )?;
        insert_unique(&mut self.variables, variable.id, variable, "variable")
    }

    pub fn update_variable(&mut self, variable: Variable) -> Result<(), StorageError> {
        replace_existing(&mut self.variables, variable.id, variable, "variable")
    }

    pub fn delete_variable(&mut self, id: Id) -> Result<Variable, StorageError> {
        self.variables
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("variable", id))
    }
}
