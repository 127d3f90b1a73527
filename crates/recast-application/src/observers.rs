//! Shared observer set.
//!
//! One subscription list serves both the pipeline engine and the session
//! service, so a UI layer registers once and sees every committed
//! mutation.

use recast_core::session::{ChangeEvent, ChangeObserver};
use std::sync::{Arc, RwLock};

/// A cloneable handle to a set of change observers.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<Vec<Arc<dyn ChangeObserver>>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for all future events.
    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        self.inner
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    /// Fires an event to every registered observer, in subscription order.
    pub fn notify(&self, event: &ChangeEvent) {
        let observers = self.inner.read().expect("observer lock poisoned");
        for observer in observers.iter() {
            observer.on_change(event);
        }
    }
}
