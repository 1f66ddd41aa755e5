//! Key/value replication between nodes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

pub type Update = (String, Value);
pub type Subscriber = Box<dyn FnMut(&[Update])>;

/// The only path from an analyzer on one node to a synth on another.
/// Values are opaque to the channel.
pub trait ReplicationChannel {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn subscribe(&self, callback: Subscriber);
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    pending: Vec<Update>,
    subscribers: Vec<Subscriber>,
}

/// In-process channel. `set` is visible to `get` immediately, but
/// subscribers only see updates when the transport is pumped with
/// [`flush`](LocalChannel::flush). Repeated writes to a key between flushes
/// collapse to the last one.
#[derive(Clone, Default)]
pub struct LocalChannel {
    inner: Rc<RefCell<Inner>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver pending updates to every subscriber. Returns how many were delivered.
    pub fn flush(&self) -> usize {
        let (updates, mut subscribers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.pending.is_empty() {
                return 0;
            }
            (
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.subscribers),
            )
        };

        for subscriber in subscribers.iter_mut() {
            subscriber(&updates);
        }

        // Subscriptions made from inside a callback land after the existing ones.
        let mut inner = self.inner.borrow_mut();
        subscribers.append(&mut inner.subscribers);
        inner.subscribers = subscribers;
        updates.len()
    }
}

impl ReplicationChannel for LocalChannel {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.borrow_mut();
        inner.values.insert(key.to_string(), value.clone());
        match inner.pending.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => inner.pending.push((key.to_string(), value)),
        }
    }

    fn subscribe(&self, callback: Subscriber) {
        self.inner.borrow_mut().subscribers.push(callback);
    }
}
