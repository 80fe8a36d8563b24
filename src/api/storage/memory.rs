//! In-process transactional tables.
//!
//! `Tx` works on a private copy of the tables and swaps it in on commit, so a dropped
//! transaction leaves no trace. The store lock is held for the lifetime of a `Tx` or a
//! `Reader`; callers must not hold either across an outbound call.

use super::StorageError;
use crate::ids::Id;
use crate::models::{
    Edge, Environment, FileEntry, Flow, FlowVariable, Http, HttpAssert, HttpBodyRaw,
    HttpKeyValue, HttpResponse, HttpResponseAssert, HttpResponseHeader, HttpVersion, Node,
    NodeExecution, Variable, Workspace, WorkspaceMember,
};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Maximum rows written per chunk by bulk creates.
pub const BULK_CHUNK: usize = 100;

/// All entity tables. Keys are time-ordered ids, so iteration is insertion order.
#[derive(Clone, Default, Debug)]
pub struct Tables {
    pub(crate) workspaces: BTreeMap<Id, Workspace>,
    pub(crate) members: BTreeMap<Id, WorkspaceMember>,
    pub(crate) files: BTreeMap<Id, FileEntry>,
    pub(crate) environments: BTreeMap<Id, Environment>,
    pub(crate) variables: BTreeMap<Id, Variable>,
    pub(crate) http: BTreeMap<Id, Http>,
    pub(crate) key_values: BTreeMap<Id, HttpKeyValue>,
    pub(crate) body_raw: BTreeMap<Id, HttpBodyRaw>,
    pub(crate) asserts: BTreeMap<Id, HttpAssert>,
    pub(crate) versions: BTreeMap<Id, HttpVersion>,
    pub(crate) responses: BTreeMap<Id, HttpResponse>,
    pub(crate) response_headers: BTreeMap<Id, HttpResponseHeader>,
    pub(crate) response_asserts: BTreeMap<Id, HttpResponseAssert>,
    pub(crate) flows: BTreeMap<Id, Flow>,
    pub(crate) nodes: BTreeMap<Id, Node>,
    pub(crate) edges: BTreeMap<Id, Edge>,
    pub(crate) flow_variables: BTreeMap<Id, FlowVariable>,
    pub(crate) node_executions: BTreeMap<Id, NodeExecution>,
}

/// Insert `row` under `id`, refusing duplicates.
pub(crate) fn insert_unique<T>(
    table: &mut BTreeMap<Id, T>,
    id: Id,
    row: T,
    entity_type: &str,
) -> Result<(), StorageError> {
    if table.contains_key(&id) {
        return Err(StorageError::conflict(
            entity_type,
            format!("id {} already exists", id),
        ));
    }
    table.insert(id, row);
    Ok(())
}

/// Replace an existing row.
pub(crate) fn replace_existing<T>(
    table: &mut BTreeMap<Id, T>,
    id: Id,
    row: T,
    entity_type: &str,
) -> Result<(), StorageError> {
    match table.get_mut(&id) {
        Some(slot) => {
            *slot = row;
            Ok(())
        }
        None => Err(StorageError::not_found(entity_type, id)),
    }
}

/// Fail with `ReferentialError` unless `id` exists in `table`.
pub(crate) fn require<T>(
    table: &BTreeMap<Id, T>,
    id: Id,
    entity_type: &str,
    referenced: &str,
) -> Result<(), StorageError> {
    if table.contains_key(&id) {
        Ok(())
    } else {
        Err(StorageError::referential(
            entity_type,
            format!("{} {} does not exist", referenced, id),
        ))
    }
}

/// Shared handle to the tables.
#[derive(Clone, Default)]
pub struct Store {
    tables: Arc<Mutex<Tables>>,
    closed: Arc<AtomicBool>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access; the lock is released when the reader is dropped.
    pub async fn reader(&self) -> Result<Reader, StorageError> {
        self.ensure_open()?;
        let guard = self.tables.clone().lock_owned().await;
        Ok(Reader { guard })
    }

    /// Begin a transaction. Dropping the returned `Tx` without `commit` rolls back.
    pub async fn begin(&self) -> Result<Tx, StorageError> {
        self.ensure_open()?;
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Tx { guard, working })
    }

    /// Refuse all further access.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            Err(StorageError::Unavailable("store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct Reader {
    guard: OwnedMutexGuard<Tables>,
}

impl Deref for Reader {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.guard
    }
}

pub struct Tx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl Tx {
    pub fn commit(self) {
        let Tx { mut guard, working } = self;
        *guard = working;
    }

    pub fn rollback(self) {}
}

impl Deref for Tx {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.working
    }
}

impl DerefMut for Tx {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.working
    }
}
