//! Lifecycle Reconciler
//!
//! Makes the set of derived children of one parent equal to a desired set:
//! delete what is no longer desired, then create or overwrite what is.
//!
//! Fail fast: every actual child is checked for its identifying relations
//! before anything is written, and the first store error aborts the call.

use std::collections::BTreeMap;

use graph_types::{Hierarchy, Object, Relation};
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::store::{self, ObjectStore, Selector, StoreError, Transaction};

/// What one lifecycle call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl LifecycleReport {
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Reconcile the children selected by `selector` against `desired`.
///
/// `required` lists the relations every selected child must carry; a child
/// missing one aborts the call with [`ReconcileError::LabelMissing`] before any
/// write. Desired children overwrite spec, relations and owner of existing
/// ones; status and identity are kept.
pub async fn reconcile_children<T: Object>(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    selector: &Selector,
    required: &[Relation],
    desired: BTreeMap<String, T>,
) -> Result<LifecycleReport, ReconcileError> {
    let actual: Vec<T> = store::list(store, hierarchy, selector).await?;

    for child in &actual {
        for relation in required {
            child.meta().require(T::KIND, *relation)?;
        }
    }

    let mut report = LifecycleReport::default();
    let mut existing = BTreeMap::new();

    for child in actual {
        if desired.contains_key(child.name()) {
            existing.insert(child.name().to_string(), child);
            continue;
        }
        match store.delete(&child.key()).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                info!(object = %child.key(), "Deleted orphaned child");
                report.deleted += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    for (name, template) in desired {
        let snapshot = match existing.remove(&name) {
            Some(current) => current,
            None => match store::create(store, template.clone()).await {
                Ok(created) => {
                    debug!(object = %created.key(), "Created child");
                    report.created += 1;
                    continue;
                }
                // Exists but was not selected, e.g. its relations were edited.
                Err(StoreError::AlreadyExists(_)) => {
                    store::get::<T>(store, hierarchy, &name).await?
                }
                Err(e) => return Err(e.into()),
            },
        };

        let mut tx = Transaction::from_snapshot(snapshot);
        tx.object_mut().adopt(&template);
        if tx.is_dirty() {
            let updated = tx.commit(store).await?;
            debug!(object = %updated.key(), "Updated child");
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
    }

    Ok(report)
}
