//! Variable scopes for a flow run.
//!
//! Lookup order: iteration frames (innermost first), flow-local, environment.
//! Locks are held only for the duration of a single read or write.

use super::lock;
use crate::api::services::expression::Scope;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

type Frame = Arc<Mutex<Map<String, Value>>>;

#[derive(Clone, Default)]
pub struct ScopeChain {
    environment: Arc<Map<String, Value>>,
    flow: Frame,
    /// Outermost first.
    iterations: Vec<Frame>,
}

impl ScopeChain {
    pub fn new(environment: Map<String, Value>, flow: Map<String, Value>) -> Self {
        Self {
            environment: Arc::new(environment),
            flow: Arc::new(Mutex::new(flow)),
            iterations: Vec::new(),
        }
    }

    /// A chain with one more iteration frame; flow and environment stay shared.
    pub fn with_iteration(&self, frame: Map<String, Value>) -> Self {
        let mut next = self.clone();
        next.iterations.push(Arc::new(Mutex::new(frame)));
        next
    }

    /// Merged view, inner scopes shadowing outer ones.
    pub fn merged(&self) -> Map<String, Value> {
        let mut out = (*self.environment).clone();
        for (k, v) in lock(&self.flow).iter() {
            out.insert(k.clone(), v.clone());
        }
        for frame in &self.iterations {
            for (k, v) in lock(frame).iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Bind in flow-local scope regardless of shadowing.
    pub fn bind_flow(&self, name: &str, value: Value) {
        lock(&self.flow).insert(name.to_string(), value);
    }

    pub fn flow_snapshot(&self) -> Map<String, Value> {
        lock(&self.flow).clone()
    }
}

impl Scope for ScopeChain {
    fn lookup(&self, name: &str) -> Option<Value> {
        for frame in self.iterations.iter().rev() {
            if let Some(v) = lock(frame).get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = lock(&self.flow).get(name) {
            return Some(v.clone());
        }
        self.environment.get(name).cloned()
    }
}
