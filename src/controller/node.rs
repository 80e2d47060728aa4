//! Node rollup and tree-parent bookkeeping.
//!
//! A Node's own status counts its Joins. Its `children` map is written by the
//! children themselves: each Node reconcile records its compliance in every
//! parent's map. Entries for children that vanished or dropped this parent
//! are pruned here, which keeps cascading Binding scopes converging.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use graph_types::{ChildCompliance, Hierarchy, Join, Kind, Node, Relation};
use tracing::debug;

use super::{Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::status;
use crate::store::{self, ObjectStore, Selector, Transaction};

pub struct NodeReconciler;

/// Record `child`'s compliance in `parent`'s children map.
async fn update_parent(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    parent: &str,
    child: &str,
    compliant: bool,
) -> Result<bool, ReconcileError> {
    let mut tx = Transaction::<Node>::begin(store, hierarchy, parent).await?;
    let status = &mut tx.object_mut().status;
    status
        .children
        .insert(child.to_string(), ChildCompliance { compliant });
    status::recount_children(status);

    let changed = tx.is_dirty();
    tx.commit(store).await?;
    Ok(changed)
}

/// Children that still exist and still list `parent` among their parents.
async fn live_children(
    store: &dyn ObjectStore,
    hierarchy: Hierarchy,
    parent: &str,
    children: &BTreeMap<String, ChildCompliance>,
) -> Result<BTreeMap<String, ChildCompliance>, ReconcileError> {
    let mut live = BTreeMap::new();
    for (name, compliance) in children {
        match store::find::<Node>(store, hierarchy, name).await? {
            Some(child) if child.spec.parents.iter().any(|p| p == parent) => {
                live.insert(name.clone(), *compliance);
            }
            _ => debug!(parent, child = %name, "Pruning stale child"),
        }
    }
    Ok(live)
}

#[async_trait]
impl Reconciler for NodeReconciler {
    fn kind(&self) -> Kind {
        Kind::Node
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(node) = store::find::<Node>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };

        let joins: Vec<Join> =
            store::list(store, hierarchy, &Selector::relation(Relation::Node, name)).await?;
        for join in &joins {
            join.meta.require(Kind::Join, Relation::Rule)?;
        }
        let (rollup, rules) = status::node_rollup(&joins);
        let children = live_children(store, hierarchy, name, &node.status.children).await?;
        let parents = node.spec.parents.clone();

        let mut tx = Transaction::from_snapshot(node);
        let status = &mut tx.object_mut().status;
        status.total_rules = rollup.total;
        status.implemented_rules = rollup.valid;
        status.rules = rules;
        status.children = children;
        status::recount_children(status);
        let mut changed = tx.is_dirty();
        if changed {
            tx.object_mut().status.run_at = Some(Utc::now());
        }
        let node = tx.commit(store).await?;

        // Every parent is attempted; failures are reported together.
        let compliant = status::node_compliant(&node);
        let mut errors = Vec::new();
        for parent in &parents {
            match update_parent(store, hierarchy, parent, name, compliant).await {
                Ok(parent_changed) => changed |= parent_changed,
                Err(e) if e.is_not_found() => errors.push(ReconcileError::ParentMissing {
                    kind: Kind::Node.display_name(hierarchy),
                    parent: parent.clone(),
                    child: name.to_string(),
                }),
                Err(e) => errors.push(e),
            }
        }
        ReconcileError::collect(errors)?;

        Ok(Reconciled::changed(changed))
    }
}
