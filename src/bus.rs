//! Typed publish/subscribe signals with scoped subscriptions.
//!
//! A [`Signal`] calls its slots synchronously, in connection order, on the emitting
//! task. Each [`Connection`] disconnects its slot when dropped, so a subscriber's
//! lifetime is the lifetime of the handle it holds.
//!
//! Self-feedback is handled with an [`EchoSuppressor`]: a writer holds an
//! [`EchoGuard`] for the duration of its own mutations and listeners check the
//! suppressor when they are invoked. Since slots run synchronously inside `emit`,
//! a notification caused by the guarded write always observes the guard.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    slots: Vec<(u64, Slot<T>)>,
}

/// A typed signal. Cloning yields another handle to the same slot list.
pub struct Signal<T> {
    inner: Arc<Mutex<Slots<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    /// Connect a slot. It stays connected until the returned handle is dropped.
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.slots.push((id, Arc::new(slot)));
            id
        };

        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.inner);
        Connection {
            disconnect: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().slots.retain(|(slot_id, _)| *slot_id != id);
                }
            })),
        }
    }

    /// Forward every emitted value into a channel, for async consumers.
    pub fn subscribe(&self) -> (Connection, mpsc::UnboundedReceiver<T>)
    where
        T: Clone + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.connect(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        (connection, rx)
    }

    /// Call every connected slot with `value`.
    pub fn emit(&self, value: &T) {
        // Snapshot so slots may connect/disconnect while being called.
        let slots: Vec<Slot<T>> = self
            .inner
            .lock()
            .slots
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();

        for slot in slots {
            slot(value);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

/// Subscription handle returned by [`Signal::connect`].
#[must_use = "the slot is disconnected as soon as the connection is dropped"]
pub struct Connection {
    disconnect: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Connection {
    pub fn disconnect(mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }

    /// Keep the slot connected for the lifetime of the signal.
    pub fn detach(mut self) {
        self.disconnect = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.disconnect.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Suppressed {
    all: usize,
    keys: HashMap<String, usize>,
}

/// Counts in-flight self-triggered writes, globally or per key (environment name).
#[derive(Clone, Default)]
pub struct EchoSuppressor {
    inner: Arc<Mutex<Suppressed>>,
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress listeners keyed on `key` until the guard drops.
    pub fn suppress(&self, key: &str) -> EchoGuard {
        *self.inner.lock().keys.entry(key.to_string()).or_insert(0) += 1;
        EchoGuard {
            inner: self.inner.clone(),
            key: Some(key.to_string()),
        }
    }

    /// Suppress every listener until the guard drops.
    pub fn suppress_all(&self) -> EchoGuard {
        self.inner.lock().all += 1;
        EchoGuard {
            inner: self.inner.clone(),
            key: None,
        }
    }

    pub fn is_suppressed(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.all > 0 || inner.keys.get(key).is_some_and(|depth| *depth > 0)
    }
}

/// Active suppression; released on drop.
pub struct EchoGuard {
    inner: Arc<Mutex<Suppressed>>,
    key: Option<String>,
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        match self.key.take() {
            None => inner.all = inner.all.saturating_sub(1),
            Some(key) => {
                if let Some(depth) = inner.keys.get_mut(&key) {
                    *depth -= 1;
                    if *depth == 0 {
                        inner.keys.remove(&key);
                    }
                }
            }
        }
    }
}
