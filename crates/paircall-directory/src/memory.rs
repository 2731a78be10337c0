//! In-process directory backend.
//!
//! The store runs in a dedicated tokio task. Handles talk to it through a
//! command channel, so every operation is applied in arrival order and each
//! watcher sees changes in the order they were committed.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::directory::{split_path, Directory, Subscription};
use crate::error::{DirectoryError, Result};
use crate::tree;

/// Failure switches for exercising error paths in callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Reject `set` and `remove`.
    pub fail_writes: bool,
    /// Reject `query_children_eq`.
    pub fail_queries: bool,
}

enum Command {
    Get {
        segs: Vec<String>,
        reply: oneshot::Sender<Value>,
    },
    Set {
        path: String,
        segs: Vec<String>,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        segs: Vec<String>,
        tx: mpsc::UnboundedSender<Value>,
    },
    Query {
        path: String,
        segs: Vec<String>,
        field: Vec<String>,
        equals: Value,
        reply: oneshot::Sender<Result<Vec<(String, Value)>>>,
    },
    SetFaults(Faults),
}

struct Watcher {
    segs: Vec<String>,
    tx: mpsc::UnboundedSender<Value>,
    last: Value,
}

/// Cloneable handle to an in-process store. The backing task stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct MemoryDirectory {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl MemoryDirectory {
    /// Spawn the store task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cmd_rx));
        Self { cmd_tx }
    }

    pub fn set_faults(&self, faults: Faults) {
        let _ = self.cmd_tx.send(Command::SetFaults(faults));
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| DirectoryError::Closed)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get(&self, path: &str) -> Result<Value> {
        let segs = split_path(path)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { segs, reply })?;
        rx.await.map_err(|_| DirectoryError::Closed)
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segs = split_path(path)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Set {
            path: path.to_string(),
            segs,
            value,
            reply,
        })?;
        rx.await.map_err(|_| DirectoryError::Closed)?
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let segs = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe { segs, tx })?;
        Ok(Subscription::new(rx))
    }

    async fn query_children_eq(
        &self,
        path: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<(String, Value)>> {
        let segs = split_path(path)?;
        let field = split_path(field)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Query {
            path: path.to_string(),
            segs,
            field,
            equals: equals.clone(),
            reply,
        })?;
        rx.await.map_err(|_| DirectoryError::Closed)?
    }
}

async fn run(mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let mut root = Value::Null;
    let mut watchers: Vec<Watcher> = Vec::new();
    let mut faults = Faults::default();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Get { segs, reply } => {
                let _ = reply.send(tree::get_at(&root, &segs).clone());
            }
            Command::Set {
                path,
                segs,
                value,
                reply,
            } => {
                if faults.fail_writes {
                    let _ = reply.send(Err(DirectoryError::Rejected {
                        operation: "write",
                        path,
                    }));
                    continue;
                }
                trace!(path = %path, value = %value, "memory directory write");
                tree::set_at(&mut root, &segs, value);
                notify(&root, &segs, &mut watchers);
                let _ = reply.send(Ok(()));
            }
            Command::Subscribe { segs, tx } => {
                let current = tree::get_at(&root, &segs).clone();
                if tx.send(current.clone()).is_ok() {
                    watchers.push(Watcher {
                        segs,
                        tx,
                        last: current,
                    });
                }
            }
            Command::Query {
                path,
                segs,
                field,
                equals,
                reply,
            } => {
                if faults.fail_queries {
                    let _ = reply.send(Err(DirectoryError::Rejected {
                        operation: "query",
                        path,
                    }));
                    continue;
                }
                let hits = match tree::get_at(&root, &segs) {
                    Value::Object(children) => children
                        .iter()
                        .filter(|(_, child)| tree::get_at(child, &field) == &equals)
                        .map(|(key, child)| (key.clone(), child.clone()))
                        .collect(),
                    _ => Vec::new(),
                };
                let _ = reply.send(Ok(hits));
            }
            Command::SetFaults(next) => {
                debug!(?next, "memory directory faults updated");
                faults = next;
            }
        }
    }

    debug!("memory directory stopped");
}

fn notify(root: &Value, written: &[String], watchers: &mut Vec<Watcher>) {
    watchers.retain_mut(|w| {
        if !tree::overlaps(&w.segs, written) {
            return !w.tx.is_closed();
        }
        let current = tree::get_at(root, &w.segs);
        if *current == w.last {
            return !w.tx.is_closed();
        }
        w.last = current.clone();
        w.tx.send(current.clone()).is_ok()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = MemoryDirectory::spawn();
        dir.set("users/a/status", json!({"type": "Idle"})).await.unwrap();
        assert_eq!(dir.get("users/a/status/type").await.unwrap(), json!("Idle"));

        dir.remove("users/a/status").await.unwrap();
        assert_eq!(dir.get("users/a").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_subscription_delivers_first_read_and_changes() {
        let dir = MemoryDirectory::spawn();
        let mut sub = dir.subscribe("users/a/status").await.unwrap();
        assert_eq!(sub.next().await, Some(Value::Null));

        dir.set("users/a/status", json!({"type": "Idle"})).await.unwrap();
        assert_eq!(sub.next().await, Some(json!({"type": "Idle"})));

        // unrelated and unchanged writes are not delivered
        dir.set("users/b/status", json!({"type": "Idle"})).await.unwrap();
        dir.set("users/a/status", json!({"type": "Idle"})).await.unwrap();
        dir.set("users/a/status/type", json!("Connected")).await.unwrap();
        assert_eq!(sub.next().await, Some(json!({"type": "Connected"})));

        // parent removal reaches the child watcher
        dir.remove("users/a").await.unwrap();
        assert_eq!(sub.next().await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_query_filters_children_in_key_order() {
        let dir = MemoryDirectory::spawn();
        for (id, kind) in [("c", "LookingForMatch"), ("a", "LookingForMatch"), ("b", "Idle")] {
            dir.set(&format!("users/{id}/status"), json!({"type": kind}))
                .await
                .unwrap();
        }
        let hits = dir
            .query_children_eq("users", "status/type", &json!("LookingForMatch"))
            .await
            .unwrap();
        let keys: Vec<_> = hits.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_query_on_empty_tree() {
        let dir = MemoryDirectory::spawn();
        let hits = dir
            .query_children_eq("users", "status/type", &json!("LookingForMatch"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_faults() {
        let dir = MemoryDirectory::spawn();
        dir.set_faults(Faults {
            fail_writes: true,
            fail_queries: true,
        });
        assert!(matches!(
            dir.set("users/a/status", json!(1)).await,
            Err(DirectoryError::Rejected { operation: "write", .. })
        ));
        assert!(dir
            .query_children_eq("users", "status/type", &json!("x"))
            .await
            .is_err());

        dir.set_faults(Faults::default());
        dir.set("users/a/status", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let dir = MemoryDirectory::spawn();
        let sub = dir.subscribe("users/a/data").await.unwrap();
        drop(sub);
        dir.set("users/a/data", json!("x")).await.unwrap();
        assert_eq!(dir.get("users/a/data").await.unwrap(), json!("x"));
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let dir = MemoryDirectory::spawn();
        assert!(matches!(
            dir.set("users/a.b", json!(1)).await,
            Err(DirectoryError::InvalidPath(_))
        ));
    }
}
