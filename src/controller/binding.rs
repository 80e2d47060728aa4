use async_trait::async_trait;
use graph_types::{Binding, Hierarchy, Kind, Node, Object, Relation};
use tracing::debug;

use super::{Context, Reconciled, Reconciler};
use crate::derive;
use crate::error::ReconcileError;
use crate::lifecycle;
use crate::store::{self, Selector, Transaction};

/// Materializes one Execution per Node in the Binding's (possibly cascaded)
/// scope.
///
/// The cascade reads each target's current `children` map, which the Node
/// reconciler maintains. The scope therefore settles over several passes as
/// child Nodes report in.
pub struct BindingReconciler;

#[async_trait]
impl Reconciler for BindingReconciler {
    fn kind(&self) -> Kind {
        Kind::Binding
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(binding) = store::find::<Binding>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };

        let nodes: Vec<Node> = store::list(store, hierarchy, &Selector::all()).await?;
        let desired = derive::desired_executions(&binding, &nodes);
        let children: Vec<String> = desired.keys().cloned().collect();

        let report = lifecycle::reconcile_children(
            store,
            hierarchy,
            &Selector::relation(Relation::Binding, binding.name()),
            &[Relation::Node, Relation::Binding],
            desired,
        )
        .await?;

        let mut tx = Transaction::from_snapshot(binding);
        tx.object_mut().status.children = children;
        let status_changed = tx.is_dirty();
        tx.commit(store).await?;

        debug!(binding = name, ?report, "Reconciled executions");
        Ok(Reconciled::changed(report.changed() || status_changed))
    }
}
