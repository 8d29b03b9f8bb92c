//! Subscriber lists with explicit unsubscribe handles.
//!
//! Every listener runs in isolation: a listener that panics is logged and
//! skipped, and the remaining listeners still observe the value.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered list of callbacks notified with a shared value.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: 'static> Listeners<T> {
    /// Creates an empty listener list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` and returns the handle that removes it again.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Invokes every listener with `value` and returns how many of them panicked.
    ///
    /// The list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside a callback.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = lock(&self.registry)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let mut failures = 0;
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                failures += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("listener panicked; continuing with remaining listeners");
            }
        }
        failures
    }
}

impl<T> Listeners<T> {
    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Returns `true` when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by a subscription call.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the listener. Safe to call after the source was dropped.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::Listeners;

    #[test]
    fn notifies_in_subscription_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            let _ = listeners.subscribe(move |value: &u32| {
                seen.lock().expect("seen lock").push((tag, *value));
            });
        }

        assert_eq!(listeners.notify(&7), 0);
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![("first", 7), ("second", 7)]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _ = listeners.subscribe(|_| panic!("listener failure"));
        let counter = Arc::clone(&hits);
        let _ = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(listeners.notify(&()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let keep = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&hits);
        let drop_me = listeners.subscribe(move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        drop_me.unsubscribe();
        listeners.notify(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 1);
        keep.unsubscribe();
        assert!(listeners.is_empty());
    }
}
