use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerEntry<T> {
    id: u64,
    callback: Callback<T>,
}

struct BusInner<T> {
    label: &'static str,
    listeners: Mutex<Vec<ListenerEntry<T>>>,
    last_value: Mutex<Option<T>>,
    next_id: AtomicU64,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send + Sync> Detach for BusInner<T> {
    fn detach(&self, id: u64) {
        self.listeners.lock().retain(|entry| entry.id != id);
    }
}

/// Fan-out primitive used by every connection channel: at-least-once delivery
/// to all registered listeners, with the last published value replayed to late
/// subscribers so they are not starved until the next push.
pub struct SubscriptionBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for SubscriptionBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SubscriptionBus<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                label,
                listeners: Mutex::new(Vec::new()),
                last_value: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a listener and replays the cached last value to it, if any,
    /// before returning. Dropping the returned handle detaches the listener.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let callback: Callback<T> = Arc::new(callback);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push(ListenerEntry {
            id,
            callback: Arc::clone(&callback),
        });

        let cached = self.inner.last_value.lock().clone();
        if let Some(value) = cached {
            invoke_isolated(self.inner.label, &*callback, &value);
        }

        Subscription {
            inner: Arc::new(SubscriptionState {
                id,
                bus: Arc::downgrade(&self.inner) as Weak<dyn Detach>,
                active: AtomicBool::new(true),
            }),
        }
    }

    /// Caches `value` as the new last value, then notifies a snapshot of the
    /// current listener set. Listeners registered or removed during the
    /// fan-out do not affect the iteration in progress, and a panicking
    /// listener never prevents the remaining listeners from running.
    pub fn publish(&self, value: T) {
        *self.inner.last_value.lock() = Some(value.clone());

        let snapshot: Vec<Callback<T>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in snapshot {
            invoke_isolated(self.inner.label, &*callback, &value);
        }
    }

    pub fn last_value(&self) -> Option<T> {
        self.inner.last_value.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

fn invoke_isolated<T>(label: &'static str, callback: &dyn Fn(&T), value: &T) {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        warn!(bus = label, "listener panicked during fan-out, continuing");
    }
}

struct SubscriptionState {
    id: u64,
    bus: Weak<dyn Detach>,
    active: AtomicBool,
}

impl SubscriptionState {
    fn detach(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(bus) = self.bus.upgrade() {
                bus.detach(self.id);
            }
        }
    }
}

impl Drop for SubscriptionState {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Handle returned by [`SubscriptionBus::subscribe`]. The listener stays
/// registered until `unsubscribe` is called or the last clone of the handle
/// is dropped. `unsubscribe` is idempotent and safe to call from inside the
/// listener itself.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionState>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.inner.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&i32) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &i32| sink.lock().push(*value))
    }

    #[test]
    fn delivers_published_values_to_listeners() {
        let bus = SubscriptionBus::new("test");
        let (seen, listener) = collector();
        let _subscription = bus.subscribe(listener);

        bus.publish(1);
        bus.publish(2);

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn replays_last_value_to_late_subscriber() {
        let bus = SubscriptionBus::new("test");
        bus.publish(41);
        bus.publish(42);

        let (seen, listener) = collector();
        let _subscription = bus.subscribe(listener);

        assert_eq!(*seen.lock(), vec![42]);
    }

    #[test]
    fn subscriber_before_any_publish_gets_nothing_until_push() {
        let bus = SubscriptionBus::new("test");
        let (seen, listener) = collector();
        let _subscription = bus.subscribe(listener);

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = SubscriptionBus::new("test");
        let (seen, listener) = collector();
        let subscription = bus.subscribe(listener);

        subscription.unsubscribe();
        subscription.unsubscribe();
        bus.publish(7);

        assert!(seen.lock().is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn drop_detaches_listener() {
        let bus = SubscriptionBus::new("test");
        let (seen, listener) = collector();
        let subscription = bus.subscribe(listener);
        drop(subscription);

        bus.publish(7);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_fanout() {
        let bus = SubscriptionBus::new("test");
        let _bad = bus.subscribe(|_: &i32| panic!("listener failure"));
        let (seen, listener) = collector();
        let _good = bus.subscribe(listener);

        bus.publish(9);

        assert_eq!(*seen.lock(), vec![9]);
    }

    #[test]
    fn unsubscribe_from_inside_listener_is_safe() {
        let bus: SubscriptionBus<i32> = SubscriptionBus::new("test");
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(Mutex::new(0_usize));

        let listener_slot = Arc::clone(&slot);
        let listener_hits = Arc::clone(&hits);
        let subscription = bus.subscribe(move |_value| {
            *listener_hits.lock() += 1;
            if let Some(own) = listener_slot.lock().as_ref() {
                own.unsubscribe();
            }
        });
        *slot.lock() = Some(subscription);

        bus.publish(1);
        bus.publish(2);

        assert_eq!(*hits.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }
}
