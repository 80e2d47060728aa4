use async_trait::async_trait;
use graph_types::{Hierarchy, Kind, Node, Object, Relation, Rule};
use tracing::debug;

use super::{Context, Reconciled, Reconciler};
use crate::derive;
use crate::error::ReconcileError;
use crate::hash::definition_hash;
use crate::lifecycle;
use crate::store::{self, Selector, Transaction};

/// Materializes one Join per matching Node and records the drift hash.
pub struct RuleReconciler;

#[async_trait]
impl Reconciler for RuleReconciler {
    fn kind(&self) -> Kind {
        Kind::Rule
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(rule) = store::find::<Rule>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };

        let nodes: Vec<Node> = store::list(store, hierarchy, &Selector::all()).await?;
        let desired = derive::desired_joins(&rule, &nodes);
        let children: Vec<String> = desired.keys().cloned().collect();

        let report = lifecycle::reconcile_children(
            store,
            hierarchy,
            &Selector::relation(Relation::Rule, rule.name()),
            &[Relation::Rule, Relation::Node],
            desired,
        )
        .await?;

        let hash = definition_hash(&rule.spec.definition);
        let mut tx = Transaction::from_snapshot(rule);
        let status = &mut tx.object_mut().status;
        status.children = children;
        status.definition_hash = hash;
        let status_changed = tx.is_dirty();
        tx.commit(store).await?;

        debug!(rule = name, ?report, "Reconciled joins");
        Ok(Reconciled::changed(report.changed() || status_changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use graph_types::Join;

    #[tokio::test]
    async fn test_joins_follow_class_membership() {
        let (ctx, store) = context();
        put(&ctx, node("web1", &["public"], &[])).await;
        put(&ctx, node("db1", &["private"], &[])).await;
        put(&ctx, rule("R1", &["public"], &["firewall"])).await;

        assert!(reconcile(&ctx, &RuleReconciler, "R1").await.changed);

        let rule: Rule = store::get(&*store, H, "R1").await.unwrap();
        assert_eq!(rule.status.children, vec!["R1-web1"]);
        assert_eq!(rule.status.definition_hash.len(), 128);

        let join: Join = store::get(&*store, H, "R1-web1").await.unwrap();
        assert_eq!(join.spec.required_binding_classes, vec!["firewall"]);
        assert_eq!(join.meta.owner.as_ref().unwrap().uid, rule.meta.uid);

        // Second run is a no-op.
        assert!(!reconcile(&ctx, &RuleReconciler, "R1").await.changed);

        // Dropping the class removes the join.
        let mut tx = Transaction::<Node>::begin(&*store, H, "web1").await.unwrap();
        tx.object_mut().spec.classes.clear();
        tx.commit(&*store).await.unwrap();

        assert!(reconcile(&ctx, &RuleReconciler, "R1").await.changed);
        let joins: Vec<Join> = store::list(&*store, H, &Selector::all()).await.unwrap();
        assert!(joins.is_empty());
    }

    #[tokio::test]
    async fn test_missing_rule_is_noop() {
        let (ctx, _store) = context();
        assert_eq!(reconcile(&ctx, &RuleReconciler, "nope").await, Reconciled::gone());
    }
}
