pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::core::task::{NewTask, Task, TaskPatch};

pub use memory::MemoryCollection;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to persist tasks: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode tasks: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single user's task collection, already scoped to that user.
///
/// Implementations deliver a full snapshot, newest `createdAt` first, to every
/// live subscription on subscribe and after each change, whichever handle
/// made the change.
pub trait TaskCollection: Send + Sync {
    fn create(&self, new: NewTask) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    fn update(
        &self,
        id: Uuid,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn subscribe(&self) -> Subscription;
}

/// An unbounded sequence of full task snapshots. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops delivery.
pub struct Subscription {
    rx: UnboundedReceiver<Vec<Task>>,
}

impl Subscription {
    pub fn new(rx: UnboundedReceiver<Vec<Task>>) -> Self {
        Self { rx }
    }

    /// Wait for the next snapshot. `None` once the collection is gone.
    pub async fn recv(&mut self) -> Option<Vec<Task>> {
        self.rx.recv().await
    }

    /// Most recent snapshot already delivered, skipping stale ones, without waiting.
    pub fn latest(&mut self) -> Option<Vec<Task>> {
        let mut latest = None;
        while let Ok(snapshot) = self.rx.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Vec<Task>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The client's handle on the task store.
///
/// Inert until a collection is attached by [`TaskStore::sign_in`]: mutators
/// are silently dropped and nothing can be subscribed. Failed mutations are
/// logged and not retried; the next snapshot reflects whatever the store holds.
pub struct TaskStore<C> {
    collection: Option<C>,
}

impl<C: TaskCollection> Default for TaskStore<C> {
    fn default() -> Self {
        Self::signed_out()
    }
}

impl<C: TaskCollection> TaskStore<C> {
    pub fn signed_out() -> Self {
        Self { collection: None }
    }

    pub fn new(collection: C) -> Self {
        Self {
            collection: Some(collection),
        }
    }

    pub fn sign_in(&mut self, collection: C) {
        self.collection = Some(collection);
    }

    pub fn is_ready(&self) -> bool {
        self.collection.is_some()
    }

    /// Create a task and return its store-assigned id. Text is trimmed; blank
    /// text creates nothing.
    pub async fn create(&self, mut new: NewTask) -> Option<Uuid> {
        let Some(collection) = &self.collection else {
            log::debug!("No session, dropping create");
            return None;
        };
        new.text = new.text.trim().to_string();
        if new.text.is_empty() {
            log::debug!("Ignoring task with empty text");
            return None;
        }
        match collection.create(new).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Failed to create task: {}", e);
                None
            }
        }
    }

    pub async fn update(&self, id: Uuid, patch: TaskPatch) {
        let Some(collection) = &self.collection else {
            log::debug!("No session, dropping update of {}", id);
            return;
        };
        if patch.is_empty() {
            return;
        }
        if let Err(e) = collection.update(id, patch).await {
            log::warn!("Failed to update task {}: {}", id, e);
        }
    }

    pub async fn delete(&self, id: Uuid) {
        let Some(collection) = &self.collection else {
            log::debug!("No session, dropping delete of {}", id);
            return;
        };
        if let Err(e) = collection.delete(id).await {
            log::warn!("Failed to delete task {}: {}", id, e);
        }
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.collection.as_ref().map(|c| c.subscribe())
    }

    pub async fn add(&self, text: &str) -> Option<Uuid> {
        self.create(NewTask::new(text)).await
    }

    pub async fn toggle(&self, task: &Task) {
        self.update(task.id, TaskPatch::completed(!task.completed))
            .await;
    }

    /// Replace a task's text. Blank text leaves the task unchanged.
    pub async fn edit(&self, id: Uuid, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            log::debug!("Ignoring edit of {} to empty text", id);
            return;
        }
        self.update(id, TaskPatch::text(text)).await;
    }

    pub async fn cycle_priority(&self, task: &Task) {
        self.update(task.id, TaskPatch::priority(task.priority.cycle()))
            .await;
    }

    pub async fn set_due(&self, id: Uuid, due: Option<DateTime<Utc>>) {
        self.update(id, TaskPatch::due_date(due)).await;
    }

    pub async fn remove(&self, id: Uuid) {
        self.delete(id).await;
    }
}
