//! Engine drivers
//!
//! The same reconcilers run in two modes:
//!
//! - **continuous**: [`Engine::run`] starts one [`Controller`] per kind and
//!   hierarchy and keeps reconciling until shutdown;
//! - **batch**: [`Engine::converge`] reconciles every object in dependency
//!   order, pass after pass, until a pass changes nothing.
//!
//! A Node's children map written in pass N widens cascading Binding scopes in
//! pass N+1, so batch convergence needs more than one pass for deep trees.

use std::sync::Arc;

use graph_types::{Hierarchy, Kind, ObjectKey};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::controller::{self, Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::provider::ProviderRegistry;
use crate::scheduler::{reconcile_once, Controller};
use crate::store::{ObjectStore, Selector};

/// Outcome of one batch pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub reconciled: usize,
    pub changed: usize,
    pub errors: Vec<(ObjectKey, ReconcileError)>,
}

/// Outcome of [`Engine::converge`]. `errors` are those of the last pass.
#[derive(Debug, Default)]
pub struct ConvergeReport {
    pub passes: usize,
    pub converged: bool,
    pub errors: Vec<(ObjectKey, ReconcileError)>,
}

pub struct Engine {
    ctx: Context,
    reconcilers: Vec<Arc<dyn Reconciler>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        providers: Arc<ProviderRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ctx: Context::new(store, providers, config),
            reconcilers: controller::reconcilers(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.ctx.store
    }

    fn reconciler(&self, kind: Kind) -> Option<&Arc<dyn Reconciler>> {
        self.reconcilers.iter().find(|r| r.kind() == kind)
    }

    /// Reconcile a single object. Kinds without a reconciler (Provider) are a no-op.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Reconciled, ReconcileError> {
        match self.reconciler(key.kind) {
            Some(reconciler) => {
                reconcile_once(&self.ctx, reconciler.as_ref(), key.hierarchy, &key.name).await
            }
            None => Ok(Reconciled::gone()),
        }
    }

    /// Reconcile every object once: reconcilers in dependency order, both
    /// hierarchies. Per-object errors are collected, not fatal.
    pub async fn run_pass(&self) -> Result<PassReport, ReconcileError> {
        let mut report = PassReport::default();
        for reconciler in &self.reconcilers {
            let kind = reconciler.kind();
            for hierarchy in Hierarchy::ALL {
                let names: Vec<String> = self
                    .ctx
                    .store
                    .list(kind, hierarchy, &Selector::all())
                    .await?
                    .iter()
                    .map(|entity| entity.meta().name.clone())
                    .collect();

                for name in names {
                    report.reconciled += 1;
                    match reconcile_once(&self.ctx, reconciler.as_ref(), hierarchy, &name).await {
                        Ok(reconciled) if reconciled.changed => report.changed += 1,
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(kind = ?kind, name = %name, "Object vanished during pass")
                        }
                        Err(e) => {
                            warn!(kind = %kind.display_name(hierarchy), name = %name, error = %e, "Reconcile failed");
                            report.errors.push((ObjectKey::new(kind, hierarchy, name), e));
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Repeat passes until one reports no change or the pass limit is hit.
    pub async fn converge(&self) -> Result<ConvergeReport, ReconcileError> {
        let limit = self.ctx.config.max_converge_passes.max(1);
        let mut report = ConvergeReport::default();
        while report.passes < limit {
            let pass = self.run_pass().await?;
            report.passes += 1;
            report.errors = pass.errors;
            debug!(
                pass = report.passes,
                reconciled = pass.reconciled,
                changed = pass.changed,
                "Pass complete"
            );
            if pass.changed == 0 {
                report.converged = true;
                break;
            }
        }

        if report.converged {
            info!(passes = report.passes, errors = report.errors.len(), "Graph converged");
        } else {
            warn!(passes = report.passes, "Graph did not converge within pass limit");
        }
        Ok(report)
    }

    /// Run one controller per kind and hierarchy until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut controllers = JoinSet::new();
        for reconciler in &self.reconcilers {
            for hierarchy in Hierarchy::ALL {
                let controller = Arc::new(Controller::new(
                    reconciler.clone(),
                    hierarchy,
                    self.ctx.clone(),
                ));
                controllers.spawn(controller.run(shutdown.clone()));
            }
        }
        info!(controllers = controllers.len(), "Engine running");

        while let Some(joined) = controllers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Controller task failed");
            }
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::store::{self, MemoryStore};
    use graph_types::{CascadePolicy, Node, ObjectMeta, Relation};

    fn engine(ctx: &Context) -> Engine {
        Engine {
            ctx: ctx.clone(),
            reconcilers: controller::reconcilers(),
        }
    }

    #[tokio::test]
    async fn test_converge_reaches_fixed_point() {
        let (ctx, _store) = context();
        put(&ctx, fake_provider("p1", "Pass")).await;
        put(&ctx, node("web1", &["public"], &[])).await;
        put(&ctx, rule("R1", &["public"], &["firewall"])).await;
        put(&ctx, binding("B1", "firewall", "R1", &["web1"], CascadePolicy::None)).await;
        put(&ctx, attestation("A1", "B1", "p1")).await;

        let engine = engine(&ctx);
        let report = engine.converge().await.unwrap();
        assert!(report.converged);
        assert!(report.errors.is_empty());

        let web1: Node = store::get(ctx.store.as_ref(), H, "web1").await.unwrap();
        assert_eq!(web1.status.implemented_rules, 1);

        let again = engine.run_pass().await.unwrap();
        assert_eq!(again.changed, 0);
    }

    #[tokio::test]
    async fn test_pass_isolates_per_object_errors() {
        let (ctx, _store) = context();
        put(&ctx, node("web1", &["public"], &[])).await;
        // A join missing its node relation cannot be reconciled.
        let broken = graph_types::Join {
            meta: ObjectMeta::new("orphan", H).with_relation(Relation::RuleRef, "R1_1"),
            spec: Default::default(),
            status: Default::default(),
        };
        put(&ctx, broken).await;

        let report = engine(&ctx).run_pass().await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].1,
            ReconcileError::LabelMissing { .. }
        ));
        // The healthy node was still reconciled.
        assert!(report.reconciled >= 2);
    }

    #[tokio::test]
    async fn test_reconcile_provider_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store, Arc::new(ProviderRegistry::new()), EngineConfig::default());
        let key = ObjectKey::new(Kind::Provider, H, "p1");
        assert_eq!(engine.reconcile(&key).await.unwrap(), Reconciled::gone());
    }
}
