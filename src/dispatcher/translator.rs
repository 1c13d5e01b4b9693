//! # Event Translation
//!
//! Turns raw watcher events into add/update/delete callbacks while keeping
//! the dispatcher's indexer in sync.
//!
//! The indexer (a reflector store) is written only here and read by
//! handlers. Before each write the previous object is looked up so updates
//! carry both old and new. A relist (`Init` .. `InitDone`) delivers updates
//! for objects already known, adds for new ones, and deletes for objects
//! that vanished while the stream was down, all once the relist completes.

use crate::dispatcher::handler::{ResourceEventHandler, WatchedObject};
use crate::dispatcher::kinds::WatchedKind;
use crate::observability::metrics;
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

pub struct EventTranslator<K: WatchedKind> {
    kind: String,
    writer: Writer<K>,
    store: Store<K>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    relist_seen: HashSet<ObjectRef<K>>,
    relist_pending: Vec<(Option<Arc<K>>, K)>,
}

impl<K: WatchedKind> std::fmt::Debug for EventTranslator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTranslator")
            .field("kind", &self.kind)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl<K: WatchedKind> Default for EventTranslator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: WatchedKind> EventTranslator<K> {
    #[must_use]
    pub fn new() -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        Self {
            kind: K::kind(&()).into_owned(),
            writer,
            store,
            handlers: Vec::new(),
            relist_seen: HashSet::new(),
            relist_pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Read handle on the indexer
    #[must_use]
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Apply one watcher event to the indexer, then notify handlers
    ///
    /// Handlers always see an indexer at least as new as the event they are
    /// handed. Relist items are held back until `InitDone` swaps the indexer.
    pub async fn apply(&mut self, event: watcher::Event<K>) {
        let previous = match &event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                self.store.get(&ObjectRef::from_obj(obj))
            }
            _ => None,
        };

        let vanished = match &event {
            watcher::Event::Init => {
                self.relist_seen.clear();
                self.relist_pending.clear();
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.relist_seen.insert(ObjectRef::from_obj(obj));
                Vec::new()
            }
            watcher::Event::InitDone => {
                let vanished = self
                    .store
                    .state()
                    .into_iter()
                    .filter(|obj| !self.relist_seen.contains(&ObjectRef::from_obj(obj.as_ref())))
                    .collect::<Vec<_>>();
                self.relist_seen.clear();
                vanished
            }
            _ => Vec::new(),
        };

        self.writer.apply_watcher_event(&event);

        match event {
            watcher::Event::Apply(obj) => self.dispatch_apply(previous, obj).await,
            watcher::Event::InitApply(obj) => self.relist_pending.push((previous, obj)),
            watcher::Event::Delete(obj) => {
                self.dispatch_delete(&WatchedObject::new(Arc::new(obj)))
                    .await;
            }
            watcher::Event::InitDone => {
                for (previous, obj) in std::mem::take(&mut self.relist_pending) {
                    self.dispatch_apply(previous, obj).await;
                }
                if !vanished.is_empty() {
                    debug!(
                        resource.kind = self.kind.as_str(),
                        count = vanished.len(),
                        "Relist found objects deleted while the watch was down"
                    );
                }
                for obj in vanished {
                    self.dispatch_delete(&WatchedObject::new(obj)).await;
                }
            }
            watcher::Event::Init => {}
        }
    }

    async fn dispatch_apply(&self, previous: Option<Arc<K>>, obj: K) {
        let new = WatchedObject::new(Arc::new(obj));
        match previous {
            Some(old) => self.dispatch_update(&WatchedObject::new(old), &new).await,
            None => self.dispatch_add(&new).await,
        }
    }

    /// Re-deliver every indexed object as an update, returning how many
    pub async fn resync(&self) -> usize {
        let objects = self.store.state();
        debug!(
            resource.kind = self.kind.as_str(),
            count = objects.len(),
            "Periodic resync"
        );
        for obj in &objects {
            let watched = WatchedObject::new(Arc::clone(obj));
            metrics::increment_watch_events(&self.kind, "resync");
            self.notify_update(&watched, &watched).await;
        }
        objects.len()
    }

    async fn dispatch_add(&self, obj: &WatchedObject<K>) {
        debug!(resource.kind = self.kind.as_str(), resource.key = %obj.key(), "watch.event.add");
        metrics::increment_watch_events(&self.kind, "add");
        for handler in &self.handlers {
            if let Err(e) = handler.on_add(obj).await {
                report(handler.name(), &self.kind, &obj.key(), "add", &e);
            }
        }
    }

    async fn dispatch_update(&self, old: &WatchedObject<K>, new: &WatchedObject<K>) {
        debug!(resource.kind = self.kind.as_str(), resource.key = %new.key(), "watch.event.update");
        metrics::increment_watch_events(&self.kind, "update");
        self.notify_update(old, new).await;
    }

    async fn notify_update(&self, old: &WatchedObject<K>, new: &WatchedObject<K>) {
        for handler in &self.handlers {
            if let Err(e) = handler.on_update(old, new).await {
                report(handler.name(), &self.kind, &new.key(), "update", &e);
            }
        }
    }

    async fn dispatch_delete(&self, obj: &WatchedObject<K>) {
        debug!(resource.kind = self.kind.as_str(), resource.key = %obj.key(), "watch.event.delete");
        metrics::increment_watch_events(&self.kind, "delete");
        for handler in &self.handlers {
            if let Err(e) = handler.on_delete(obj).await {
                report(handler.name(), &self.kind, &obj.key(), "delete", &e);
            }
        }
    }
}

fn report(
    handler: &str,
    kind: &str,
    key: &str,
    event: &str,
    error: &crate::dispatcher::HandlerError,
) {
    error!(
        handler = handler,
        resource.kind = kind,
        resource.key = key,
        event = event,
        error = %error,
        "handler.failed"
    );
    metrics::increment_handler_errors(handler);
}
