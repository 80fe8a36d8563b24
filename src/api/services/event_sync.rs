//! Dependency-ordered change events for reactive clients.
//!
//! Handlers record one entry per created, updated or deleted row into an [`EventBatch`]
//! while their transaction is open, then publish the batch after commit. Publishing sorts
//! the entries so that prerequisites (a flow) reach subscribers before dependents (its
//! nodes, then its edges).

use crate::ids::Id;
use crate::models::{ContentKind, KeyValueKind};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, join_all};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("publish canceled")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Workspace,
    Environment,
    EnvVariable,
    Folder,
    FlowFile,
    Flow,
    FlowVariable,
    Node,
    Edge,
    Http,
    HttpHeader,
    HttpParam,
    HttpBodyForm,
    HttpBodyUrl,
    HttpBodyRaw,
    HttpAssert,
    HttpVersion,
    HttpResponse,
    HttpResponseHeader,
    HttpResponseAssert,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::Workspace,
        EventKind::Environment,
        EventKind::EnvVariable,
        EventKind::Folder,
        EventKind::FlowFile,
        EventKind::Flow,
        EventKind::FlowVariable,
        EventKind::Node,
        EventKind::Edge,
        EventKind::Http,
        EventKind::HttpHeader,
        EventKind::HttpParam,
        EventKind::HttpBodyForm,
        EventKind::HttpBodyUrl,
        EventKind::HttpBodyRaw,
        EventKind::HttpAssert,
        EventKind::HttpVersion,
        EventKind::HttpResponse,
        EventKind::HttpResponseHeader,
        EventKind::HttpResponseAssert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Workspace => "workspace",
            EventKind::Environment => "environment",
            EventKind::EnvVariable => "env-variable",
            EventKind::Folder => "folder",
            EventKind::FlowFile => "flow-file",
            EventKind::Flow => "flow",
            EventKind::FlowVariable => "flow-variable",
            EventKind::Node => "node",
            EventKind::Edge => "edge",
            EventKind::Http => "http",
            EventKind::HttpHeader => "http-header",
            EventKind::HttpParam => "http-param",
            EventKind::HttpBodyForm => "http-body-form",
            EventKind::HttpBodyUrl => "http-body-url",
            EventKind::HttpBodyRaw => "http-body-raw",
            EventKind::HttpAssert => "http-assert",
            EventKind::HttpVersion => "http-version",
            EventKind::HttpResponse => "http-response",
            EventKind::HttpResponseHeader => "http-response-header",
            EventKind::HttpResponseAssert => "http-response-assert",
        }
    }

    /// Kinds whose events must be delivered first.
    pub fn dependencies(self) -> &'static [EventKind] {
        use EventKind::*;
        match self {
            Workspace => &[],
            Environment | Folder => &[Workspace],
            EnvVariable => &[Environment],
            Flow => &[Workspace, Environment],
            FlowFile => &[Flow, Folder],
            FlowVariable => &[Flow],
            Http => &[Workspace, Folder],
            HttpHeader | HttpParam | HttpBodyForm | HttpBodyUrl | HttpBodyRaw | HttpAssert
            | HttpVersion => &[Http],
            Node => &[Flow, Http],
            Edge => &[Node],
            HttpResponse => &[Http, HttpVersion],
            HttpResponseHeader => &[HttpResponse],
            HttpResponseAssert => &[HttpResponse, HttpAssert],
        }
    }

    /// Tree entries: flow files have their own kind, folders and request entries share one.
    pub fn for_file(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Flow => EventKind::FlowFile,
            ContentKind::Folder | ContentKind::Http => EventKind::Folder,
        }
    }

    pub fn for_key_values(kind: KeyValueKind) -> Self {
        match kind {
            KeyValueKind::Header => EventKind::HttpHeader,
            KeyValueKind::SearchParam => EventKind::HttpParam,
            KeyValueKind::BodyForm => EventKind::HttpBodyForm,
            KeyValueKind::BodyUrlEncoded => EventKind::HttpBodyUrl,
        }
    }

    /// Position in publish order.
    pub fn priority(self) -> usize {
        PRIORITIES.get(&self).copied().unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kahn's algorithm; among ready kinds the alphabetically first goes next.
fn publish_order(kinds: &[EventKind], deps: impl Fn(EventKind) -> Vec<EventKind>) -> Vec<EventKind> {
    let mut remaining: HashMap<EventKind, usize> = kinds.iter().map(|k| (*k, deps(*k).len())).collect();
    let mut dependents: HashMap<EventKind, Vec<EventKind>> = HashMap::new();
    for kind in kinds {
        for dep in deps(*kind) {
            dependents.entry(dep).or_default().push(*kind);
        }
    }
    let mut ready: BTreeSet<(&'static str, EventKind)> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(k, _)| (k.as_str(), *k))
        .collect();

    let mut order = Vec::with_capacity(kinds.len());
    while let Some(next) = ready.pop_first() {
        let kind = next.1;
        order.push(kind);
        for dependent in dependents.get(&kind).into_iter().flatten() {
            if let Some(n) = remaining.get_mut(dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert((dependent.as_str(), *dependent));
                }
            }
        }
    }
    if order.len() != kinds.len() {
        panic!("event kind dependencies contain a cycle");
    }
    order
}

static PRIORITIES: Lazy<HashMap<EventKind, usize>> = Lazy::new(|| {
    publish_order(&EventKind::ALL, |k| k.dependencies().to_vec())
        .into_iter()
        .enumerate()
        .map(|(i, k)| (k, i))
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Topic a sync event is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTopic {
    pub workspace_id: Id,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub workspace_id: Id,
    pub kind: EventKind,
    pub change: ChangeKind,
    pub id: Id,
    /// Row after the change; `null` for deletes.
    #[serde(default)]
    pub data: Value,
}

impl SyncEvent {
    pub fn new(workspace_id: Id, kind: EventKind, change: ChangeKind, id: Id, data: Value) -> Self {
        Self {
            workspace_id,
            kind,
            change,
            id,
            data,
        }
    }

    pub fn insert<T: Serialize>(workspace_id: Id, kind: EventKind, id: Id, row: &T) -> Self {
        Self::new(workspace_id, kind, ChangeKind::Insert, id, to_value(row))
    }

    pub fn update<T: Serialize>(workspace_id: Id, kind: EventKind, id: Id, row: &T) -> Self {
        Self::new(workspace_id, kind, ChangeKind::Update, id, to_value(row))
    }

    pub fn delete(workspace_id: Id, kind: EventKind, id: Id) -> Self {
        Self::new(workspace_id, kind, ChangeKind::Delete, id, Value::Null)
    }

    pub fn topic(&self) -> SyncTopic {
        SyncTopic {
            workspace_id: self.workspace_id,
            kind: self.kind,
        }
    }
}

fn to_value<T: Serialize>(row: &T) -> Value {
    serde_json::to_value(row).unwrap_or(Value::Null)
}

pub type TopicFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Ordered stream of `(topic, payload)` pairs for one subscriber.
pub struct Subscription<T, P> {
    rx: mpsc::Receiver<(T, P)>,
}

impl<T, P> Subscription<T, P> {
    pub async fn recv(&mut self) -> Option<(T, P)> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<(T, P)> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
pub trait SyncStreamer<T, P>: Send + Sync
where
    T: Send + Sync + 'static,
    P: Send + 'static,
{
    /// Deliver to every matching subscriber, waiting on full buffers until the payload
    /// is accepted or `cancel` fires.
    async fn publish(&self, topic: T, payload: P, cancel: &CancellationToken) -> Result<(), SyncError>;

    async fn subscribe(&self, filter: TopicFilter<T>) -> Subscription<T, P>;
}

struct Subscriber<T, P> {
    filter: TopicFilter<T>,
    tx: mpsc::Sender<(T, P)>,
}

pub struct InMemoryStreamer<T, P> {
    subscribers: RwLock<Vec<Subscriber<T, P>>>,
    buffer: usize,
}

impl<T, P> InMemoryStreamer<T, P> {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[async_trait]
impl<T, P> SyncStreamer<T, P> for InMemoryStreamer<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    async fn publish(&self, topic: T, payload: P, cancel: &CancellationToken) -> Result<(), SyncError> {
        let closed = {
            let subscribers = self.subscribers.read().await;
            let deliveries = subscribers
                .iter()
                .filter(|s| (s.filter)(&topic))
                .map(|s| {
                    let message = (topic.clone(), payload.clone());
                    async move {
                        tokio::select! {
                            _ = cancel.cancelled() => Err(SyncError::Canceled),
                            sent = s.tx.send(message) => Ok(sent.is_err()),
                        }
                    }
                });
            let results = join_all(deliveries).await;
            let mut closed = false;
            for result in results {
                closed |= result?;
            }
            closed
        };
        if closed {
            let mut subscribers = self.subscribers.write().await;
            let before = subscribers.len();
            subscribers.retain(|s| !s.tx.is_closed());
            debug!("Pruned {} closed subscribers", before - subscribers.len());
        }
        Ok(())
    }

    async fn subscribe(&self, filter: TopicFilter<T>) -> Subscription<T, P> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.write().await.push(Subscriber { filter, tx });
        Subscription { rx }
    }
}

/// Streamer carrying store change events.
pub type EventStreamer = InMemoryStreamer<SyncTopic, SyncEvent>;

type PublishFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), SyncError>> + Send>;

struct Pending {
    kind: EventKind,
    sub_order: i64,
    publish: PublishFn,
}

/// Thread-safe accumulator of publish closures.
#[derive(Default)]
pub struct EventBatch {
    pending: Mutex<Vec<Pending>>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add<F, Fut>(&self, kind: EventKind, sub_order: i64, publish: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        self.lock().push(Pending {
            kind,
            sub_order,
            publish: Box::new(move |cancel| Box::pin(publish(cancel))),
        });
    }

    /// Queue a store change for delivery through `streamer`.
    pub fn record<S>(&self, streamer: &Arc<S>, event: SyncEvent, sub_order: i64)
    where
        S: SyncStreamer<SyncTopic, SyncEvent> + 'static,
    {
        let streamer = streamer.clone();
        self.add(event.kind, sub_order, move |cancel| async move {
            streamer.publish(event.topic(), event, &cancel).await
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain and run every queued closure in `(priority, sub_order)` order.
    ///
    /// Entries queued while a publish is running belong to the next publish.
    pub async fn publish(&self, cancel: &CancellationToken) -> Result<usize, SyncError> {
        let mut entries = std::mem::take(&mut *self.lock());
        if entries.is_empty() {
            return Ok(0);
        }
        entries.sort_by_key(|e| (e.kind.priority(), e.sub_order));
        let count = entries.len();
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(SyncError::Canceled);
            }
            (entry.publish)(cancel.clone()).await?;
        }
        debug!("Published {} events", count);
        Ok(count)
    }
}
