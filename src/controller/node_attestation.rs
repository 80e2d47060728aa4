//! Runs the provider check behind one NodeAttestation.
//!
//! The provider call is bounded by `attest_timeout_secs`; hitting the bound
//! records an Unknown result rather than dropping the attempt. The result is
//! always written, even when the check could not run, and the owning
//! Execution is touched afterwards.

use async_trait::async_trait;
use graph_types::{
    derived_name, Hierarchy, Kind, NodeAttestation, ObjectKey, Provider, Relation,
};
use tracing::{debug, warn};

use super::{Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::provider::{Attested, ProviderError};
use crate::store::{self, Transaction};

pub struct NodeAttestationReconciler;

impl NodeAttestationReconciler {
    async fn attest(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        node_attestation: &NodeAttestation,
    ) -> Result<Attested, ProviderError> {
        let provider_ref = &node_attestation.spec.provider_ref;
        let provider = store::find::<Provider>(ctx.store.as_ref(), hierarchy, provider_ref)
            .await
            .map_err(|e| ProviderError::Infra(e.to_string()))?
            .ok_or_else(|| {
                ProviderError::Config(format!("provider {provider_ref} does not exist"))
            })?;

        let client = ctx.providers.build(&provider)?;
        let timeout = ctx.config.attest_timeout();
        let attested = match tokio::time::timeout(timeout, client.attest()).await {
            Ok(attested) => attested,
            Err(_) => Attested::infra(format!("attestation timed out after {timeout:?}")),
        };
        if let Err(e) = client.close().await {
            warn!(provider = %provider_ref, error = %e, "Closing provider client failed");
        }
        Ok(attested)
    }
}

#[async_trait]
impl Reconciler for NodeAttestationReconciler {
    fn kind(&self) -> Kind {
        Kind::NodeAttestation
    }

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError> {
        let store = ctx.store.as_ref();
        let Some(node_attestation) =
            store::find::<NodeAttestation>(store, hierarchy, name).await?
        else {
            return Ok(Reconciled::gone());
        };
        let node = node_attestation
            .meta
            .require(Kind::NodeAttestation, Relation::Node)?
            .to_string();
        let binding = node_attestation
            .meta
            .require(Kind::NodeAttestation, Relation::Binding)?
            .to_string();

        // A provider that cannot be built is recorded as Unknown, then reported.
        let (attested, config_error) = match self.attest(ctx, hierarchy, &node_attestation).await
        {
            Ok(attested) => (attested, None),
            Err(ProviderError::Infra(message)) => (Attested::infra(message), None),
            Err(e) => {
                let mut attested = Attested::infra(e.to_string());
                attested.result.reason = "provider could not be built".into();
                (attested, Some(e))
            }
        };

        let previous = node_attestation.status.result.result;
        let verdict = attested.result.result;
        let mut tx = Transaction::from_snapshot(node_attestation);
        tx.object_mut().status.result = attested.result;
        tx.commit(store).await?;
        debug!(node_attestation = name, %verdict, "Recorded attestation result");

        let execution = ObjectKey::new(Kind::Execution, hierarchy, derived_name(&binding, &node));
        store::touch(store, &execution, name).await?;

        if let Some(e) = config_error {
            return Err(e.into());
        }

        let reconciled = Reconciled::changed(previous != verdict);
        match attested.error {
            Some(e) => {
                warn!(node_attestation = name, error = %e, "Attestation could not be executed");
                Ok(reconciled.requeue_after(ctx.config.error_backoff()))
            }
            None => Ok(reconciled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::controller::testing::*;
    use crate::controller::{AttestationReconciler, BindingReconciler};
    use crate::provider::{AttestationClient, ProviderConfig, ProviderFactory, ProviderRegistry};
    use graph_types::{CascadePolicy, Execution, Verdict};
    use std::sync::Arc;
    use std::time::Duration;

    async fn graph(ctx: &Context, provider: &str) {
        put(ctx, node("web1", &[], &[])).await;
        put(ctx, binding("B1", "firewall", "R1", &["web1"], CascadePolicy::None)).await;
        put(ctx, attestation("A1", "B1", provider)).await;
        reconcile(ctx, &BindingReconciler, "B1").await;
        reconcile(ctx, &AttestationReconciler, "A1").await;
    }

    async fn result(ctx: &Context) -> graph_types::AttestationResult {
        let na: NodeAttestation = store::get(ctx.store.as_ref(), H, "A1-B1-web1")
            .await
            .unwrap();
        na.status.result
    }

    #[tokio::test]
    async fn test_pass_is_recorded_and_execution_touched() {
        let (ctx, store) = context();
        put(&ctx, fake_provider("p1", "Pass")).await;
        graph(&ctx, "p1").await;

        let reconciled = reconcile(&ctx, &NodeAttestationReconciler, "A1-B1-web1").await;
        assert!(reconciled.changed);
        assert_eq!(reconciled.requeue_after, None);

        let result = result(&ctx).await;
        assert_eq!(result.result, Verdict::Pass);
        assert!(result.run_at.is_some());

        let execution: Execution = store::get(&*store, H, "B1-web1").await.unwrap();
        assert!(execution
            .meta
            .annotations
            .contains_key(&store::touch_annotation("A1-B1-web1")));

        // Same verdict again: not a change.
        assert!(!reconcile(&ctx, &NodeAttestationReconciler, "A1-B1-web1").await.changed);
    }

    #[tokio::test]
    async fn test_infra_error_is_unknown_and_requeued() {
        let (ctx, _store) = context();
        let mut provider = fake_provider("p1", "Pass");
        provider
            .spec
            .config
            .insert("error".into(), "backend down".into());
        put(&ctx, provider).await;
        graph(&ctx, "p1").await;

        let reconciled = reconcile(&ctx, &NodeAttestationReconciler, "A1-B1-web1").await;
        assert_eq!(
            reconciled.requeue_after,
            Some(ctx.config.error_backoff())
        );
        let result = result(&ctx).await;
        assert_eq!(result.result, Verdict::Unknown);
        assert!(result.error.unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn test_missing_provider_records_unknown_and_errors() {
        let (ctx, _store) = context();
        graph(&ctx, "absent").await;

        let err = NodeAttestationReconciler
            .reconcile(&ctx, H, "A1-B1-web1")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
        assert_eq!(result(&ctx).await.result, Verdict::Unknown);
    }

    struct Hanging;

    struct HangingClient;

    #[async_trait]
    impl AttestationClient for HangingClient {
        async fn attest(&self) -> Attested {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Attested::verdict(Verdict::Pass, "too late")
        }
    }

    impl ProviderFactory for Hanging {
        fn build(
            &self,
            _name: &str,
            _config: &ProviderConfig<'_>,
        ) -> Result<Box<dyn AttestationClient>, ProviderError> {
            Ok(Box::new(HangingClient))
        }
    }

    #[tokio::test]
    async fn test_timeout_is_unknown() {
        let (ctx, store) = context();
        let mut providers = ProviderRegistry::new();
        providers.force_register("fake", Arc::new(Hanging));
        let ctx = Context::new(
            ctx.store.clone(),
            Arc::new(providers),
            EngineConfig {
                attest_timeout_secs: 1,
                ..Default::default()
            },
        );
        put(&ctx, fake_provider("p1", "Pass")).await;
        graph(&ctx, "p1").await;

        let reconciled = reconcile(&ctx, &NodeAttestationReconciler, "A1-B1-web1").await;
        assert!(reconciled.requeue_after.is_some());

        let na: NodeAttestation = store::get(&*store, H, "A1-B1-web1").await.unwrap();
        assert_eq!(na.status.result.result, Verdict::Unknown);
        assert!(na.status.result.error.unwrap().contains("timed out"));
    }
}
