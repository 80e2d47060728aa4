use async_trait::async_trait;
use chrono::Utc;
use graph_types::{Execution, Hierarchy, Join, Kind, Object, ObjectKey, Relation};

use super::{Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::status;
use crate::store::{self, Selector, Transaction};

/// Rolls the Executions of a Join's Node and rule reference into the Join,
/// then touches the Node.
pub struct JoinReconciler;

#[async_trait]
impl Reconciler for JoinReconciler {
    fn kind(&self) -> Kind {
        Kind::Join
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(join) = store::find::<Join>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };
        let node = join.meta.require(Kind::Join, Relation::Node)?.to_string();
        let rule_ref = join.meta.require(Kind::Join, Relation::RuleRef)?.to_string();

        let executions: Vec<Execution> = store::list(
            store,
            hierarchy,
            &Selector::relation(Relation::Node, node.clone()).and(Relation::RuleRef, rule_ref),
        )
        .await?;
        let counted: Vec<String> = status::counted_executions(&join, &executions)
            .into_iter()
            .map(|e| e.name().to_string())
            .collect();
        let rollup = status::join_rollup(&join, &executions);

        let mut tx = Transaction::from_snapshot(join);
        let current = tx.object().status.clone();
        let counts_changed = current.total != rollup.total
            || current.valid != rollup.valid
            || current.implemented != rollup.implemented();

        let status = &mut tx.object_mut().status;
        status.executions = counted;
        if counts_changed {
            status.total = rollup.total;
            status.valid = rollup.valid;
            status.implemented = rollup.implemented();
            status.run_at = Some(Utc::now());
        }
        tx.commit(store).await?;

        store::touch(store, &ObjectKey::new(Kind::Node, hierarchy, node), name).await?;
        Ok(Reconciled::changed(counts_changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::controller::{BindingReconciler, RuleReconciler};
    use graph_types::{CascadePolicy, Node};

    async fn mark_execution(ctx: &Context, name: &str, total: usize, passed: usize) {
        let mut tx = Transaction::<Execution>::begin(ctx.store.as_ref(), H, name)
            .await
            .unwrap();
        tx.object_mut().status.total = total;
        tx.object_mut().status.passed = passed;
        tx.commit(ctx.store.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_counts_required_class_executions() {
        let (ctx, store) = context();
        put(&ctx, node("web1", &["public"], &[])).await;
        put(&ctx, rule("R1", &["public"], &["firewall"])).await;
        put(&ctx, binding("B1", "firewall", "R1", &["web1"], CascadePolicy::None)).await;
        put(&ctx, binding("B2", "antivirus", "R1", &["web1"], CascadePolicy::None)).await;
        reconcile(&ctx, &RuleReconciler, "R1").await;
        reconcile(&ctx, &BindingReconciler, "B1").await;
        reconcile(&ctx, &BindingReconciler, "B2").await;

        // No valid executions yet.
        reconcile(&ctx, &JoinReconciler, "R1-web1").await;
        let join: Join = store::get(&*store, H, "R1-web1").await.unwrap();
        assert_eq!(join.status.executions, vec!["B1-web1"]);
        assert_eq!((join.status.total, join.status.valid), (1, 0));
        assert!(!join.status.implemented);

        mark_execution(&ctx, "B1-web1", 1, 1).await;
        assert!(reconcile(&ctx, &JoinReconciler, "R1-web1").await.changed);
        let join: Join = store::get(&*store, H, "R1-web1").await.unwrap();
        assert_eq!((join.status.total, join.status.valid), (1, 1));
        assert!(join.status.implemented);
        assert!(join.status.run_at.is_some());

        // Node was touched.
        let web1: Node = store::get(&*store, H, "web1").await.unwrap();
        assert!(web1
            .meta
            .annotations
            .contains_key(&store::touch_annotation("R1-web1")));

        assert!(!reconcile(&ctx, &JoinReconciler, "R1-web1").await.changed);
    }
}
