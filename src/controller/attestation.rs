use async_trait::async_trait;
use graph_types::{Attestation, Execution, Hierarchy, Kind, Object, Relation};
use tracing::debug;

use super::{Context, Reconciled, Reconciler};
use crate::derive;
use crate::error::ReconcileError;
use crate::lifecycle;
use crate::store::{self, Selector, Transaction};

/// Materializes one NodeAttestation per Execution of the declared Binding.
pub struct AttestationReconciler;

#[async_trait]
impl Reconciler for AttestationReconciler {
    fn kind(&self) -> Kind {
        Kind::Attestation
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(attestation) = store::find::<Attestation>(store, hierarchy, name).await? else {
            return Ok(Reconciled::gone());
        };

        let executions: Vec<Execution> = store::list(
            store,
            hierarchy,
            &Selector::relation(Relation::Binding, attestation.spec.binding_ref.clone()),
        )
        .await?;
        let desired = derive::desired_node_attestations(&attestation, &executions)?;
        let children: Vec<String> = desired.keys().cloned().collect();

        let report = lifecycle::reconcile_children(
            store,
            hierarchy,
            &Selector::relation(Relation::Attestation, attestation.name()),
            &[Relation::Attestation, Relation::Node, Relation::Binding],
            desired,
        )
        .await?;

        let mut tx = Transaction::from_snapshot(attestation);
        tx.object_mut().status.children = children;
        let status_changed = tx.is_dirty();
        tx.commit(store).await?;

        debug!(attestation = name, ?report, "Reconciled node attestations");
        Ok(Reconciled::changed(report.changed() || status_changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::controller::BindingReconciler;
    use graph_types::{CascadePolicy, NodeAttestation, Verdict};

    #[tokio::test]
    async fn test_one_node_attestation_per_execution() {
        let (ctx, store) = context();
        put(&ctx, node("web1", &[], &[])).await;
        put(&ctx, node("web2", &[], &[])).await;
        put(&ctx, binding("B1", "firewall", "R1", &["web1", "web2"], CascadePolicy::None)).await;
        put(&ctx, attestation("A1", "B1", "p1")).await;

        reconcile(&ctx, &BindingReconciler, "B1").await;
        assert!(reconcile(&ctx, &AttestationReconciler, "A1").await.changed);

        let created: Vec<NodeAttestation> = store::list(
            &*store,
            H,
            &Selector::relation(Relation::Attestation, "A1"),
        )
        .await
        .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created
            .iter()
            .all(|na| na.status.result.result == Verdict::NotStarted));
        assert!(created.iter().all(|na| na.spec.provider_ref == "p1"));

        let a1: Attestation = store::get(&*store, H, "A1").await.unwrap();
        assert_eq!(a1.status.children, vec!["A1-B1-web1", "A1-B1-web2"]);

        assert!(!reconcile(&ctx, &AttestationReconciler, "A1").await.changed);
    }
}
