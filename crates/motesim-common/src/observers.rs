//! Observer registry with handle-scoped subscriptions.
//!
//! Registration returns a [`Subscription`] handle; dropping the handle
//! unsubscribes. Notifications run serially on the notifying thread, in
//! registration order.

use std::sync::{Arc, Mutex, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    subscribers: Vec<(u64, Callback<E>)>,
    next_id: u64,
}

/// A set of observers of events of type `E`.
pub struct Observers<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Observers {
            inner: Arc::new(Mutex::new(Registry {
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register an observer. The subscription lasts as long as the returned
    /// handle is alive.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription
    where
        E: 'static,
    {
        let id = {
            let mut registry = self.inner.lock().unwrap();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut registry = inner.lock().unwrap();
                    registry.subscribers.retain(|(sub_id, _)| *sub_id != id);
                }
            })),
        }
    }

    /// Notify all current observers, in registration order.
    ///
    /// Callbacks run outside the registry lock, so an observer may subscribe
    /// or drop subscriptions from within its callback.
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = {
            let registry = self.inner.lock().unwrap();
            registry.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Observers<E> {
    fn clone(&self) -> Self {
        Observers {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle controlling the lifetime of one observer registration.
///
/// Dropping the handle removes the observer. Use [`Subscription::forever`]
/// to keep an observer registered for the life of the registry.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Detach the handle, leaving the observer registered permanently.
    pub fn forever(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_registration_order() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let _a = observers.subscribe(move |v| seen_a.lock().unwrap().push(("a", *v)));
        let seen_b = Arc::clone(&seen);
        let _b = observers.subscribe(move |v| seen_b.lock().unwrap().push(("b", *v)));

        observers.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let observers: Observers<()> = Observers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        let sub = observers.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        observers.notify(&());
        drop(sub);
        observers.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_forever_outlives_handle_scope() {
        let observers: Observers<()> = Observers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = Arc::clone(&count);
        observers.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .forever();

        observers.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
