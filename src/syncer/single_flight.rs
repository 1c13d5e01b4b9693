//! # Single-Flight
//!
//! At most one pass per key runs at a time. A trigger that arrives while a
//! pass is running queues exactly one follow-up pass; further triggers
//! before that follow-up starts are coalesced into it. The follow-up reads
//! the latest state when it starts, so nothing observed is lost.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Slot {
    running: tokio::sync::Mutex<()>,
    queued: AtomicBool,
}

pub struct SingleFlight<Key> {
    slots: Mutex<HashMap<Key, Arc<Slot>>>,
}

impl<Key> Default for SingleFlight<Key> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<Key: Eq + Hash + Clone> std::fmt::Debug for SingleFlight<Key> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

impl<Key: Eq + Hash + Clone> SingleFlight<Key> {
    /// Run `pass` for `key` once any in-progress pass finishes
    ///
    /// Returns `None` when the trigger was coalesced into an already queued pass.
    pub async fn run<F, Fut, T>(&self, key: &Key, pass: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if slot.queued.swap(true, Ordering::AcqRel) {
            self.release(key, slot);
            return None;
        }

        let output = {
            let _running = slot.running.lock().await;
            slot.queued.store(false, Ordering::Release);
            pass().await
        };

        self.release(key, slot);
        Some(output)
    }

    /// Keys with a pass running or queued
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, key: &Key, slot: Arc<Slot>) {
        let mut slots = self.lock();
        // Map entry plus our handle means nobody else is waiting
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Arc<Slot>>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
