//! Process-wide transport availability.
//!
//! The encrypted transport comes and goes with connectivity and session
//! state.  Rather than a bare global, availability is an explicit handle
//! with an install / clear lifecycle; conversations sample it at each use.

use std::sync::{Arc, RwLock};

use velours_net::Messaging;

#[derive(Clone, Default)]
pub struct TransportHandle {
    inner: Arc<RwLock<Option<Arc<dyn Messaging>>>>,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the active transport.
    pub fn install(&self, messaging: Arc<dyn Messaging>) {
        *self.inner.write().expect("transport lock poisoned") = Some(messaging);
    }

    /// Drop the active transport; sends fail fast until one is reinstalled.
    pub fn clear(&self) {
        *self.inner.write().expect("transport lock poisoned") = None;
    }

    /// The currently installed transport, if any.
    pub fn current(&self) -> Option<Arc<dyn Messaging>> {
        self.inner.read().expect("transport lock poisoned").clone()
    }
}
