//! Dispatcher handler that feeds delete (and optionally update) events into
//! the [`TrashCan`].

use crate::dispatcher::{HandlerError, ResourceEventHandler, WatchedKind, WatchedObject};
use crate::trash::TrashCan;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub struct TrashCanHandler<K> {
    trash: Arc<TrashCan>,
    handle_updates: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for TrashCanHandler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrashCanHandler")
            .field("root", &self.trash.root())
            .field("handle_updates", &self.handle_updates)
            .finish()
    }
}

impl<K> TrashCanHandler<K> {
    #[must_use]
    pub fn new(trash: Arc<TrashCan>, handle_updates: bool) -> Self {
        Self {
            trash,
            handle_updates,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: WatchedKind> ResourceEventHandler<K> for TrashCanHandler<K> {
    fn name(&self) -> &'static str {
        "trash-can"
    }

    async fn on_update(
        &self,
        old: &WatchedObject<K>,
        new: &WatchedObject<K>,
    ) -> Result<(), HandlerError> {
        if !self.handle_updates
            || Arc::ptr_eq(&old.object, &new.object)
            || K::semantically_equal(&old.object, &new.object)
        {
            return Ok(());
        }

        let payload = old.payload()?;
        let types = old.types.clone();
        let meta = old.meta().clone();
        let trash = Arc::clone(&self.trash);
        let entry =
            tokio::task::spawn_blocking(move || trash.update(&types, &meta, &payload)).await??;
        debug!(resource.kind = old.kind(), resource.name = %old.key(), path = %entry.path.display(), "Trashed replaced object");
        Ok(())
    }

    async fn on_delete(&self, obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        let payload = obj.payload()?;
        let types = obj.types.clone();
        let meta = obj.meta().clone();
        let trash = Arc::clone(&self.trash);
        let entry =
            tokio::task::spawn_blocking(move || trash.delete(&types, &meta, &payload)).await??;
        debug!(resource.kind = obj.kind(), resource.name = %obj.key(), path = %entry.path.display(), "Trashed deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn config_map(name: &str, rv: &str, value: &str) -> WatchedObject<ConfigMap> {
        WatchedObject::new(Arc::new(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some(rv.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        }))
    }

    fn handler(dir: &tempfile::TempDir, handle_updates: bool) -> (TrashCanHandler<ConfigMap>, Arc<TrashCan>) {
        let trash = Arc::new(TrashCan::new(
            dir.path(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        ));
        (TrashCanHandler::new(Arc::clone(&trash), handle_updates), trash)
    }

    #[tokio::test]
    async fn test_delete_produces_one_recoverable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, trash) = handler(&dir, false);

        handler.on_delete(&config_map("app", "7", "v1")).await.unwrap();

        let entries = trash.list("ConfigMap", Some("default"), "app").unwrap();
        assert_eq!(entries.len(), 1);
        let restored = trash.load(&entries[0]).unwrap();
        assert_eq!(restored.kind, "ConfigMap");
        assert_eq!(restored.api_version, "v1");
        assert_eq!(restored.object["data"]["key"], "v1");
        assert_eq!(restored.object["kind"], "ConfigMap");
    }

    #[tokio::test]
    async fn test_updates_ignored_unless_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, trash) = handler(&dir, false);

        handler
            .on_update(&config_map("app", "1", "a"), &config_map("app", "2", "b"))
            .await
            .unwrap();

        assert!(trash.entries().is_empty());
    }

    #[tokio::test]
    async fn test_update_stores_previous_object_only_on_semantic_change() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, trash) = handler(&dir, true);

        // resourceVersion churn only
        handler
            .on_update(&config_map("app", "1", "a"), &config_map("app", "2", "a"))
            .await
            .unwrap();
        assert!(trash.entries().is_empty());

        handler
            .on_update(&config_map("app", "2", "a"), &config_map("app", "3", "b"))
            .await
            .unwrap();

        let entries = trash.list("configmap", Some("default"), "app").unwrap();
        assert_eq!(entries.len(), 1);
        let restored = trash.load(&entries[0]).unwrap();
        assert_eq!(restored.reason, crate::trash::TrashReason::Updated);
        assert_eq!(restored.object["data"]["key"], "a");
    }
}
