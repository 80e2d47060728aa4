//! In-memory ObjectStore
//!
//! A single `RwLock` guards the object map and the reverse relation index.
//! Watch events are fanned out over a `broadcast` channel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use graph_types::{Entity, Hierarchy, Kind, ObjectKey, Relation};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use super::{ChangeKind, ObjectStore, Selector, StoreError, WatchEvent, WatchStream};

const WATCH_CAPACITY: usize = 4096;

type IndexKey = (Kind, Hierarchy, Relation, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Entity>,
    index: HashMap<IndexKey, BTreeSet<String>>,
}

impl Inner {
    fn index_insert(&mut self, entity: &Entity) {
        let kind = entity.kind();
        let meta = entity.meta();
        for (relation, value) in &meta.relations {
            self.index
                .entry((kind, meta.hierarchy, *relation, value.clone()))
                .or_default()
                .insert(meta.name.clone());
        }
    }

    fn index_remove(&mut self, entity: &Entity) {
        let kind = entity.kind();
        let meta = entity.meta();
        for (relation, value) in &meta.relations {
            let key = (kind, meta.hierarchy, *relation, value.clone());
            if let Some(names) = self.index.get_mut(&key) {
                names.remove(&meta.name);
                if names.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    /// Keys of every object transitively owned by `uid`.
    fn owned_by(&self, uid: Uuid) -> Vec<ObjectKey> {
        let mut pending = vec![uid];
        let mut found = Vec::new();
        while let Some(owner) = pending.pop() {
            for (key, entity) in &self.objects {
                let meta = entity.meta();
                if meta.owner.as_ref().map(|o| o.uid) == Some(owner) {
                    found.push(key.clone());
                    pending.push(meta.uid);
                }
            }
        }
        found
    }
}

/// `ObjectStore` backed by process memory.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn publish(&self, key: ObjectKey, change: ChangeKind, generation_changed: bool) {
        // No subscribers is fine.
        let _ = self.events.send(WatchEvent {
            key,
            change,
            generation_changed,
        });
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;
        Ok(inner.objects.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Entity, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(
        &self,
        kind: Kind,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Entity>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;

        let Some(((relation, value), rest)) = selector.terms().split_first() else {
            return Ok(inner
                .objects
                .iter()
                .filter(|(key, _)| key.kind == kind && key.hierarchy == hierarchy)
                .map(|(_, entity)| entity.clone())
                .collect());
        };

        // Narrow by the first term through the index, then filter on the rest.
        let Some(names) = inner
            .index
            .get(&(kind, hierarchy, *relation, value.clone()))
        else {
            return Ok(Vec::new());
        };

        Ok(names
            .iter()
            .filter_map(|name| {
                inner
                    .objects
                    .get(&ObjectKey::new(kind, hierarchy, name.clone()))
            })
            .filter(|entity| {
                rest.iter()
                    .all(|(r, v)| entity.meta().relation(*r) == Some(v.as_str()))
            })
            .cloned()
            .collect())
    }

    async fn create(&self, mut entity: Entity) -> Result<Entity, StoreError> {
        let key = entity.key();
        {
            let mut inner = self
                .inner
                .write()
                .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;
            if inner.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists(key));
            }

            let meta = entity.meta_mut();
            if meta.uid.is_nil() {
                meta.uid = Uuid::new_v4();
            }
            if meta.created_at.is_none() {
                meta.created_at = Some(Utc::now());
            }
            meta.resource_version = 1;
            meta.generation = 1;

            inner.index_insert(&entity);
            inner.objects.insert(key.clone(), entity.clone());
        }

        debug!(object = %key, "Created");
        self.publish(key, ChangeKind::Created, true);
        Ok(entity)
    }

    async fn patch(&self, mut entity: Entity, baseline: &Entity) -> Result<Entity, StoreError> {
        let key = entity.key();
        let generation_changed;
        {
            let mut inner = self
                .inner
                .write()
                .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;
            let current = inner
                .objects
                .get(&key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;

            let expected = baseline.meta().resource_version;
            let found = current.meta().resource_version;
            if expected != found {
                return Err(StoreError::Conflict {
                    key,
                    expected,
                    found,
                });
            }

            generation_changed = !current.same_spec(&entity);
            let stored = current.meta();
            let meta = entity.meta_mut();
            meta.uid = stored.uid;
            meta.created_at = stored.created_at;
            meta.resource_version = stored.resource_version + 1;
            meta.generation = if generation_changed {
                stored.generation + 1
            } else {
                stored.generation
            };

            inner.index_remove(&current);
            inner.index_insert(&entity);
            inner.objects.insert(key.clone(), entity.clone());
        }

        self.publish(key, ChangeKind::Updated, generation_changed);
        Ok(entity)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let removed = {
            let mut inner = self
                .inner
                .write()
                .map_err(|e| StoreError::Internal(format!("Lock: {}", e)))?;
            let root = inner
                .objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?
                .meta()
                .uid;

            let mut keys = vec![key.clone()];
            keys.extend(inner.owned_by(root));

            let mut removed = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entity) = inner.objects.remove(&key) {
                    inner.index_remove(&entity);
                    removed.push(key);
                }
            }
            removed
        };

        for key in removed {
            debug!(object = %key, "Deleted");
            self.publish(key, ChangeKind::Deleted, true);
        }
        Ok(())
    }

    fn watch(&self, kind: Kind) -> WatchStream {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |item| async move {
                match item {
                    Ok(event) if event.key.kind == kind => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(StoreError::WatchLagged(n))),
                }
            })
            .boxed()
    }
}
