//! Per-turn interruption tokens with parent→child cascade.
//!
//! Each running turn owns an [`InterruptToken`]. Setting it signals every
//! suspension point (LLM call, permission wait, tool execution) to unwind
//! cleanly. Cancel callbacks let transports and tools abort in-flight work.
//!
//! **Groups** support cascading interruption: when a parent turn ends or is
//! aborted, children registered in its group are interrupted too, so a
//! nested agent can never outlive its parent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

type CancelCallback = Box<dyn Fn() + Send + Sync>;

struct TokenInner {
    interrupted: AtomicBool,
    notify: Notify,
    callbacks: Mutex<Vec<CancelCallback>>,
}

/// A cancellation token polled at every suspension point of a turn.
#[derive(Clone)]
pub struct InterruptToken {
    inner: Arc<TokenInner>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                interrupted: AtomicBool::new(false),
                notify: Notify::new(),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signal interruption: set the flag, wake async waiters, and run the
    /// registered cancel callbacks (which must be idempotent).
    pub fn interrupt(&self) {
        if self.inner.interrupted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.notify.notify_waiters();
        let callbacks = self.inner.callbacks.lock();
        for cb in callbacks.iter() {
            cb();
        }
    }

    /// Check whether interruption has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Reset the flag and drop cancel callbacks. Called by the turn
    /// controller at the start of each turn.
    pub fn clear(&self) {
        self.inner.interrupted.store(false, Ordering::Release);
        self.inner.callbacks.lock().clear();
    }

    /// Register a cancel callback for the current turn. Runs immediately
    /// when the token is already set.
    pub fn on_interrupt(&self, cb: impl Fn() + Send + Sync + 'static) {
        if self.is_interrupted() {
            cb();
            return;
        }
        self.inner.callbacks.lock().push(Box::new(cb));
    }

    /// Wait until the token is set. Resolves immediately when it already is.
    pub async fn cancelled(&self) {
        loop {
            if self.is_interrupted() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active tokens per owner key, with group support for cascading
/// parent→child interruption of nested agent turns.
pub struct InterruptRegistry {
    tokens: Mutex<HashMap<String, InterruptToken>>,
    /// parent key → set of child keys.
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for InterruptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for an owner.
    pub fn register(&self, key: &str) -> InterruptToken {
        let token = InterruptToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Interrupt an owner's turn and every child in its group. Returns
    /// `true` when a token was found for the owner.
    pub fn interrupt(&self, key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(key) {
            token.interrupt();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(key) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(token) = tokens.get(child) {
                    token.interrupt();
                }
            }
        }

        found
    }

    /// Remove an owner's token and any group it anchored.
    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    /// Register a child owner under a parent's cascade group.
    pub fn add_child(&self, parent: &str, child: &str) {
        self.groups
            .lock()
            .entry(parent.to_owned())
            .or_default()
            .insert(child.to_owned());
    }

    pub fn remove_child(&self, parent: &str, child: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                groups.remove(parent);
            }
        }
    }
}
