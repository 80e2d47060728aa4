use async_trait::async_trait;
use chrono::Utc;
use graph_types::{Execution, Hierarchy, Join, Kind, NodeAttestation, Object, Relation};

use super::{Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::status;
use crate::store::{self, Selector, Transaction};

/// Counts passed NodeAttestations of one Execution and touches the Joins it
/// counts toward.
pub struct ExecutionReconciler;

#[async_trait]
impl Reconciler for ExecutionReconciler {
    fn kind(&self) -> Kind {
        Kind::Execution
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(execution) = store::find::<Execution>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };
        let node = execution.meta.require(Kind::Execution, Relation::Node)?.to_string();
        let binding = execution
            .meta
            .require(Kind::Execution, Relation::Binding)?
            .to_string();
        let rule_ref = execution
            .meta
            .require(Kind::Execution, Relation::RuleRef)?
            .to_string();

        let attestations: Vec<NodeAttestation> = store::list(
            store,
            hierarchy,
            &Selector::relation(Relation::Node, node.clone()).and(Relation::Binding, binding),
        )
        .await?;
        let rollup = status::execution_rollup(&attestations);

        let mut tx = Transaction::from_snapshot(execution);
        let current = tx.object().status.clone();
        let counts_changed = current.total != rollup.total || current.passed != rollup.valid;

        let status = &mut tx.object_mut().status;
        status.attestations = attestations.iter().map(|a| a.name().to_string()).collect();
        if counts_changed {
            status.total = rollup.total;
            status.passed = rollup.valid;
            status.run_at = Some(Utc::now());
        }
        tx.commit(store).await?;

        let joins: Vec<Join> = store::list(
            store,
            hierarchy,
            &Selector::relation(Relation::Node, node).and(Relation::RuleRef, rule_ref),
        )
        .await?;
        for join in &joins {
            store::touch(store, &join.key(), name).await?;
        }

        Ok(Reconciled::changed(counts_changed))
    }
}
