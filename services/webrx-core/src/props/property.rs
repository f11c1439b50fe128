//! A single observable configuration key

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::Value;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Observable property: a current value plus its subscribers
pub struct Property {
    name: String,
    value: Mutex<Option<Value>>,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    /// Serialises set+notify so notifications for this key fire in write order.
    /// Reentrant so a callback may write the same key again on its own thread.
    dispatch: ReentrantMutex<()>,
}

impl Property {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            value: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            dispatch: ReentrantMutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value, `None` if never set
    pub fn get(&self) -> Option<Value> {
        self.value.lock().clone()
    }

    /// Store a new value and notify subscribers synchronously.
    /// Returns `false` (and notifies nobody) if the value is unchanged.
    pub fn set(&self, value: Value) -> bool {
        let _dispatch = self.dispatch.lock();
        {
            let mut current = self.value.lock();
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value.clone());
        }

        // Snapshot so callbacks can wire/unwire without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(&value);
        }
        true
    }

    /// Subscribe to changes; the callback lives as long as the returned handle
    pub fn wire<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, Arc::new(callback)));
        Subscription {
            property: Arc::downgrade(self),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn unwire(&self, id: u64) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("value", &*self.value.lock())
            .finish()
    }
}

/// Registration handle; dropping it removes the callback
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    property: Weak<Property>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(property) = self.property.upgrade() {
            property.unwire(self.id);
        }
    }
}
