//! Typed activity event bus with wildcard subscribers and scoping.
//!
//! Delivery is synchronous on the emitter's thread, in two phases per
//! event: the cohort subscribed to the event's kind first, then the
//! wildcard cohort, each in registration order. The callback set is
//! snapshotted before dispatch so subscriptions cancelled mid-emit are
//! neither skipped nor double-delivered. A panicking callback is isolated;
//! remaining callbacks still run.
//!
//! Subscribers must not perform long work in-band; long-running reactions
//! (rendering, persistence) schedule themselves.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use uuid::Uuid;

use wh_domain::event::{ActivityEvent, ActivityPayload, EventKind};

/// Soft cap above which the bus warns about a probable subscriber leak.
const LISTENER_WARN_THRESHOLD: usize = 50;

pub type EventCallback = Arc<dyn Fn(&ActivityEvent) + Send + Sync>;

struct Entry {
    id: u64,
    callback: EventCallback,
}

#[derive(Default)]
struct BusInner {
    typed: RwLock<HashMap<EventKind, Vec<Entry>>>,
    wildcard: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    leak_warned: AtomicBool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// RAII handle returned by `subscribe`. Dropping it (or calling
/// [`Subscription::cancel`]) removes the callback from the bus.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    kind: Option<EventKind>,
}

impl Subscription {
    /// Explicitly cancel the subscription (equivalent to dropping it).
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        match self.kind {
            Some(kind) => {
                let mut typed = inner.typed.write();
                if let Some(entries) = typed.get_mut(&kind) {
                    entries.retain(|e| e.id != self.id);
                    if entries.is_empty() {
                        typed.remove(&kind);
                    }
                }
            }
            None => {
                inner.wildcard.write().retain(|e| e.id != self.id);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The root activity bus shared by the engine and its observers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&ActivityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_inner(Some(kind), Arc::new(callback))
    }

    /// Subscribe to every event (the wildcard cohort, delivered after the
    /// typed cohort).
    pub fn subscribe_all(
        &self,
        callback: impl Fn(&ActivityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_inner(None, Arc::new(callback))
    }

    fn subscribe_inner(&self, kind: Option<EventKind>, callback: EventCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::warn!("subscribe on a cleaned-up bus is inert");
            return Subscription {
                bus: Weak::new(),
                id,
                kind,
            };
        }

        let entry = Entry {
            id,
            callback,
        };
        match kind {
            Some(kind) => self.inner.typed.write().entry(kind).or_default().push(entry),
            None => self.inner.wildcard.write().push(entry),
        }

        let count = self.listener_count();
        if count >= LISTENER_WARN_THRESHOLD
            && !self.inner.leak_warned.swap(true, Ordering::AcqRel)
        {
            tracing::warn!(
                listeners = count,
                threshold = LISTENER_WARN_THRESHOLD,
                "listener count is high; probable subscriber leak"
            );
        }

        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            kind,
        }
    }

    /// Emit a payload as a fresh unscoped event.
    pub fn emit(&self, payload: ActivityPayload) {
        self.emit_event(ActivityEvent::new(payload));
    }

    /// Emit a fully built event (used by scoped buses to stamp parentage).
    pub fn emit_event(&self, event: ActivityEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        // Snapshot both cohorts before dispatch so concurrent subscribe /
        // cancel cannot skip or double-deliver remaining callbacks.
        let typed: Vec<EventCallback> = {
            let map = self.inner.typed.read();
            map.get(&event.kind())
                .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default()
        };
        let wildcard: Vec<EventCallback> = {
            let entries = self.inner.wildcard.read();
            entries.iter().map(|e| e.callback.clone()).collect()
        };

        for callback in typed.iter().chain(wildcard.iter()) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".into());
                tracing::error!(
                    kind = ?event.kind(),
                    error = %detail,
                    "event subscriber panicked; continuing delivery"
                );
            }
        }
    }

    /// Total registered listeners across both cohorts.
    pub fn listener_count(&self) -> usize {
        let typed: usize = self.inner.typed.read().values().map(Vec::len).sum();
        typed + self.inner.wildcard.read().len()
    }

    /// Drop every subscription and close the bus. Idempotent; the instance
    /// is not reusable afterward.
    pub fn cleanup(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.typed.write().clear();
        self.inner.wildcard.write().clear();
    }

    /// Wrap this bus so every emitted event is stamped with `parent_id`.
    pub fn scoped(&self, parent_id: Uuid) -> ScopedBus {
        ScopedBus {
            bus: self.clone(),
            parent_id,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoped bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A view of the root bus that stamps a `parent_id` on every emitted
/// event. Nested agents use this so parent UIs can filter nested activity
/// without conflating it with their own.
#[derive(Clone)]
pub struct ScopedBus {
    bus: EventBus,
    parent_id: Uuid,
}

impl ScopedBus {
    pub fn emit(&self, payload: ActivityPayload) {
        self.bus
            .emit_event(ActivityEvent::with_parent(payload, self.parent_id));
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&ActivityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(kind, callback)
    }

    pub fn subscribe_all(
        &self,
        callback: impl Fn(&ActivityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe_all(callback)
    }

    pub fn parent_id(&self) -> Uuid {
        self.parent_id
    }

    pub fn root(&self) -> &EventBus {
        &self.bus
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn chunk(text: &str) -> ActivityPayload {
        ActivityPayload::AssistantChunk { text: text.into() }
    }

    #[test]
    fn typed_cohort_receives_before_wildcard() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let _wild = bus.subscribe_all(move |_| o.lock().push("wildcard"));
        let o = order.clone();
        let _typed = bus.subscribe(EventKind::AssistantChunk, move |_| o.lock().push("typed"));

        bus.emit(chunk("x"));
        assert_eq!(*order.lock(), vec!["typed", "wildcard"]);
    }

    #[test]
    fn registration_order_preserved_within_cohort() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = (0..3)
            .map(|i| {
                let o = order.clone();
                bus.subscribe(EventKind::AssistantChunk, move |_| o.lock().push(i))
            })
            .collect();

        bus.emit(chunk("x"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn typed_subscriber_ignores_other_kinds() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0usize));

        let h = hits.clone();
        let _sub = bus.subscribe(EventKind::ConversationClear, move |_| *h.lock() += 1);

        bus.emit(chunk("ignored"));
        assert_eq!(*hits.lock(), 0);
        bus.emit(ActivityPayload::ConversationClear);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn cancel_restores_listener_count() {
        let bus = EventBus::new();
        assert_eq!(bus.listener_count(), 0);

        let sub = bus.subscribe(EventKind::AssistantChunk, |_| {});
        let wild = bus.subscribe_all(|_| {});
        assert_eq!(bus.listener_count(), 2);

        sub.cancel();
        drop(wild);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0usize));

        let _bad = bus.subscribe(EventKind::AssistantChunk, |_| panic!("subscriber bug"));
        let h = hits.clone();
        let _good = bus.subscribe(EventKind::AssistantChunk, move |_| *h.lock() += 1);

        bus.emit(chunk("x"));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn unsubscribe_during_emit_does_not_skip_remaining() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        // First subscriber cancels the second mid-emit by dropping its
        // handle; the snapshot still delivers to the second.
        let second_handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handle_slot = second_handle.clone();
        let h = hits.clone();
        let _first = bus.subscribe(EventKind::AssistantChunk, move |_| {
            h.lock().push("first");
            handle_slot.lock().take();
        });
        let h = hits.clone();
        let second = bus.subscribe(EventKind::AssistantChunk, move |_| {
            h.lock().push("second");
        });
        *second_handle.lock() = Some(second);

        bus.emit(chunk("x"));
        assert_eq!(*hits.lock(), vec!["first", "second"]);

        // The cancellation took effect for the next emit.
        bus.emit(chunk("y"));
        assert_eq!(*hits.lock(), vec!["first", "second", "first"]);
    }

    #[test]
    fn cleanup_is_idempotent_and_closes_the_bus() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0usize));

        let h = hits.clone();
        let _sub = bus.subscribe_all(move |_| *h.lock() += 1);

        bus.cleanup();
        bus.cleanup();
        assert_eq!(bus.listener_count(), 0);

        bus.emit(chunk("after cleanup"));
        assert_eq!(*hits.lock(), 0);

        // Subscriptions after cleanup are inert.
        let _late = bus.subscribe_all(|_| {});
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn scoped_bus_stamps_parent_id() {
        let bus = EventBus::new();
        let parent = Uuid::new_v4();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _sub = bus.subscribe_all(move |e| s.lock().push(e.parent_id));

        bus.scoped(parent).emit(chunk("scoped"));
        bus.emit(chunk("root"));

        assert_eq!(*seen.lock(), vec![Some(parent), None]);
    }
}
