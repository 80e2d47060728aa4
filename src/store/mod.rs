//! Object Store Abstraction
//!
//! The engine reads and writes the graph exclusively through [`ObjectStore`].
//! Relations are indexed, so "all Executions of Binding B" is a [`Selector`]
//! lookup. Writes are optimistic: [`Transaction`] snapshots an object, the
//! caller mutates a working copy, and `commit` patches against the snapshot.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use graph_types::{Entity, Hierarchy, Kind, Object, ObjectKey, ObjectMeta, Relation, TypeError};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(ObjectKey),

    #[error("Object already exists: {0}")]
    AlreadyExists(ObjectKey),

    #[error("Conflict writing {key}: expected resource version {expected}, found {found}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        found: u64,
    },

    #[error("Watch stream lagged, {0} events dropped")]
    WatchLagged(u64),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("Storage error: {0}")]
    Internal(String),
}

// ── Selectors ──

/// Conjunction of relation equalities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    terms: Vec<(Relation, String)>,
}

impl Selector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn relation(relation: Relation, value: impl Into<String>) -> Self {
        Self::all().and(relation, value)
    }

    pub fn and(mut self, relation: Relation, value: impl Into<String>) -> Self {
        self.terms.push((relation, value.into()));
        self
    }

    pub fn terms(&self) -> &[(Relation, String)] {
        &self.terms
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.terms
            .iter()
            .all(|(relation, value)| meta.relation(*relation) == Some(value.as_str()))
    }
}

// ── Watch ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: ObjectKey,
    pub change: ChangeKind,
    /// False for status/annotation-only updates.
    pub generation_changed: bool,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

// ── Store trait ──

/// Document store with relation-indexed queries and optimistic writes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Entity, StoreError>;

    async fn list(
        &self,
        kind: Kind,
        hierarchy: Hierarchy,
        selector: &Selector,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Insert a new object. Assigns uid/created_at when unset.
    async fn create(&self, entity: Entity) -> Result<Entity, StoreError>;

    /// Replace `entity` if the stored object is still at `baseline`'s
    /// resource version, otherwise fail with [`StoreError::Conflict`].
    async fn patch(&self, entity: Entity, baseline: &Entity) -> Result<Entity, StoreError>;

    /// Delete an object and, transitively, every object it owns.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Change notifications for one kind, across both hierarchies.
    fn watch(&self, kind: Kind) -> WatchStream;
}

// ── Typed helpers ──

pub async fn get<T: Object>(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    name: &str,
) -> Result<T, StoreError> {
    let entity = store.get(&ObjectKey::new(T::KIND, hierarchy, name)).await?;
    Ok(T::from_entity(entity)?)
}

/// Like [`get`], mapping NotFound to `None`.
pub async fn find<T: Object>(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    name: &str,
) -> Result<Option<T>, StoreError> {
    match get(store, hierarchy, name).await {
        Ok(object) => Ok(Some(object)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn list<T: Object>(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    selector: &Selector,
) -> Result<Vec<T>, StoreError> {
    store
        .list(T::KIND, hierarchy, selector)
        .await?
        .into_iter()
        .map(|entity| T::from_entity(entity).map_err(StoreError::from))
        .collect()
}

pub async fn create<T: Object>(store: &dyn ObjectStore, object: T) -> Result<T, StoreError> {
    let created = store.create(object.into_entity()).await?;
    Ok(T::from_entity(created)?)
}

// ── Transactions ──

/// Snapshot plus working copy of one object.
#[derive(Debug, Clone)]
pub struct Transaction<T: Object> {
    baseline: T,
    working: T,
}

impl<T: Object> Transaction<T> {
    /// Fetch the current object and open a transaction on it.
    pub async fn begin(
        store: &dyn ObjectStore,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Self, StoreError> {
        let snapshot = get::<T>(store, hierarchy, name).await?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Open a transaction on an object the caller already read.
    pub fn from_snapshot(snapshot: T) -> Self {
        Self {
            working: snapshot.clone(),
            baseline: snapshot,
        }
    }

    pub fn object(&self) -> &T {
        &self.working
    }

    pub fn object_mut(&mut self) -> &mut T {
        &mut self.working
    }

    pub fn baseline(&self) -> &T {
        &self.baseline
    }

    pub fn is_dirty(&self) -> bool {
        self.working != self.baseline
    }

    /// Write the working copy. An unchanged working copy is not written and
    /// the snapshot is returned as-is.
    pub async fn commit(self, store: &dyn ObjectStore) -> Result<T, StoreError> {
        if !self.is_dirty() {
            return Ok(self.baseline);
        }
        let baseline = self.baseline.into_entity();
        let written = store.patch(self.working.into_entity(), &baseline).await?;
        Ok(T::from_entity(written)?)
    }
}

// ── Invalidation ──

/// Annotation written on a parent when `source` touches it.
pub fn touch_annotation(source: &str) -> String {
    format!("{source}.compliance-graph/last-run")
}

/// Stamp `key` with the current time so its controller re-queues it.
///
/// A missing target or a lost race are both fine: the object is gone, or
/// someone else's write already produced a watch event.
pub async fn touch(store: &dyn ObjectStore, key: &ObjectKey, source: &str) -> Result<(), StoreError> {
    let baseline = match store.get(key).await {
        Ok(entity) => entity,
        Err(StoreError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    let mut working = baseline.clone();
    working
        .meta_mut()
        .annotations
        .insert(touch_annotation(source), Utc::now().to_rfc3339());

    match store.patch(working, &baseline).await {
        Ok(_) | Err(StoreError::NotFound(_)) | Err(StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
