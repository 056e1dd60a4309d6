//! Named-event pub/sub with two listener-invocation modes.
//!
//! `settle_in_series` fires every listener and waits for each in turn but
//! swallows listener errors (surfaced instead via an `"error"` event);
//! `fulfill_in_series` fires every listener, collects each listener's
//! returned hint, and aborts the whole emission on the first error. Listener
//! registration is FIFO and invocation follows registration order; removing
//! a listener mid-emission only affects events emitted after the removal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A listener's hint: whatever it chooses to return from a
/// `fulfill_in_series` emission, used by the caller as a merge-in hint.
pub type ListenerHint = Option<serde_json::Value>;

type SettleListener = Box<dyn Fn(&[serde_json::Value]) -> BoxFuture<'static, ()> + Send + Sync>;
type FulfillListener =
    Box<dyn Fn(&[serde_json::Value]) -> BoxFuture<'static, Result<ListenerHint>> + Send + Sync>;

enum Listener {
    Settle(SettleListener),
    Fulfill(FulfillListener),
}

struct Registration {
    id: u64,
    listener: Listener,
}

/// An event bus. Cloneable handle semantics are not provided directly —
/// sources own one `EventBus` and hand out subscription handles via `on`.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// A token that unregisters its listener when `unsubscribe` is called or
/// when dropped — whichever comes first is idempotent.
pub struct Subscription<'a> {
    bus: &'a EventBus,
    event: String,
    id: u64,
}

impl<'a> Subscription<'a> {
    pub fn unsubscribe(self) {
        self.bus.off_by_id(&self.event, self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, event: &str, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, listener });
        id
    }

    /// Register a settle-in-series listener for `event`.
    pub fn on_settle<F>(&self, event: &str, listener: F) -> u64
    where
        F: Fn(&[serde_json::Value]) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.register(event, Listener::Settle(Box::new(listener)))
    }

    /// Register a fulfill-in-series listener for `event` (the `before…`
    /// family). Its return value becomes a hint; an `Err` aborts emission.
    pub fn on_fulfill<F>(&self, event: &str, listener: F) -> u64
    where
        F: Fn(&[serde_json::Value]) -> BoxFuture<'static, Result<ListenerHint>>
            + Send
            + Sync
            + 'static,
    {
        self.register(event, Listener::Fulfill(Box::new(listener)))
    }

    fn off_by_id(&self, event: &str, id: u64) {
        if let Some(regs) = self.listeners.lock().get_mut(event) {
            regs.retain(|r| r.id != id);
        }
    }

    pub fn off(&self, event: &str, id: u64) {
        self.off_by_id(event, id);
    }

    /// Fire-and-wait: every listener runs in registration order; a listener
    /// error is reported on `"error"` but does not stop subsequent listeners
    /// or the caller's own continuation.
    pub async fn settle_in_series(&self, event: &str, args: &[serde_json::Value]) {
        // Snapshot registration order before awaiting so a listener added or
        // removed mid-emission only affects subsequent emissions, not this one.
        let snapshot: Vec<u64> = {
            let guard = self.listeners.lock();
            guard
                .get(event)
                .map(|v| v.iter().map(|r| r.id).collect())
                .unwrap_or_default()
        };

        for id in snapshot {
            let fut = {
                let guard = self.listeners.lock();
                guard.get(event).and_then(|v| {
                    v.iter().find(|r| r.id == id).and_then(|r| match &r.listener {
                        Listener::Settle(f) => Some(f(args)),
                        Listener::Fulfill(_) => None,
                    })
                })
            };
            if let Some(fut) = fut {
                fut.await;
            }
        }
    }

    /// Fire-and-collect: each listener runs in registration order; its
    /// returned hint is collected; the first `Err` aborts and is returned
    /// to the caller without running the remaining listeners.
    pub async fn fulfill_in_series(
        &self,
        event: &str,
        args: &[serde_json::Value],
    ) -> Result<Vec<ListenerHint>> {
        let snapshot: Vec<u64> = {
            let guard = self.listeners.lock();
            guard
                .get(event)
                .map(|v| v.iter().map(|r| r.id).collect())
                .unwrap_or_default()
        };

        let mut hints = Vec::with_capacity(snapshot.len());
        for id in snapshot {
            let fut = {
                let guard = self.listeners.lock();
                guard.get(event).and_then(|v| {
                    v.iter().find(|r| r.id == id).and_then(|r| match &r.listener {
                        Listener::Fulfill(f) => Some(f(args)),
                        Listener::Settle(_) => None,
                    })
                })
            };
            if let Some(fut) = fut {
                hints.push(fut.await?);
            }
        }
        Ok(hints)
    }
}
