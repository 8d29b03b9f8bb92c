use std::{fmt, sync::Arc};

use tokio::sync::watch;

use crate::listeners::{Listeners, Subscription};

/// Connectivity flag fed by the environment.
///
/// Cloning yields another handle to the same flag. Changes are published
/// both on a [`watch`] channel (for tasks) and to registered listeners.
#[derive(Clone)]
pub struct Connectivity {
    state: Arc<watch::Sender<bool>>,
    listeners: Listeners<bool>,
}

impl fmt::Debug for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connectivity")
            .field("online", &self.is_online())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            state: Arc::new(sender),
            listeners: Listeners::new(),
        }
    }

    /// Current connectivity state.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a new environment signal.
    ///
    /// Returns `true` when the state actually changed; listeners are only
    /// notified on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            #[cfg(feature = "tracing")]
            tracing::info!(online, "connectivity changed");
            self.listeners.notify(&online);
        }
        changed
    }

    /// Receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Registers a callback invoked with the new state on every transition.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners.subscribe(move |online: &bool| callback(*online))
    }
}
