use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{DirectoryError, Result};

/// Operations every directory backend provides.
///
/// Writes are last-write-wins with no compare-and-swap. Notifications are
/// delivered at least once and in order per subscription; two different
/// subscriptions carry no ordering guarantee relative to each other.
#[async_trait]
pub trait Directory: Send + Sync {
    /// One-shot read. Returns `Value::Null` when nothing is stored.
    async fn get(&self, path: &str) -> Result<Value>;

    /// Overwrite the value at `path`. Writing `null` removes it.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Continuous subscription. The current value is delivered first,
    /// then every subsequent change.
    async fn subscribe(&self, path: &str) -> Result<Subscription>;

    /// One-shot query over the children of `path`, keeping those whose
    /// value at the relative `field` path equals `equals`. Results come in
    /// the backend's natural ordering.
    async fn query_children_eq(
        &self,
        path: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<(String, Value)>>;
}

/// Stream of values observed at one path. Dropping it cancels the
/// subscription on the backend.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    /// Next observed value, or `None` once the backend ends the stream.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// Split a path into its segments, rejecting characters the realtime
/// database reserves. Empty segments (leading, trailing or doubled `/`)
/// are ignored, so `""` addresses the root.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.chars().any(|c| matches!(c, '.' | '#' | '$' | '[' | ']') || c.is_control()) {
                Err(DirectoryError::InvalidPath(path.to_string()))
            } else {
                Ok(s.to_string())
            }
        })
        .collect()
}
