//! Per-kind reconcilers
//!
//! One [`Reconciler`] per entity kind. A reconciler is handed an object key,
//! re-reads everything it needs from the store, writes its derived children
//! and its own status, and touches the parent that aggregates it. A vanished
//! object is a no-op.
//!
//! ```text
//! Rule ──────────> Joins            Join ───────────> status, touch Node
//! Binding ───────> Executions       Execution ──────> status, touch Joins
//! Attestation ───> NodeAttestations NodeAttestation > attest, touch Execution
//! Node ──────────> status, parent children maps
//! ```

mod attestation;
mod binding;
mod execution;
mod join;
mod node;
mod node_attestation;
mod rule;

pub use attestation::AttestationReconciler;
pub use binding::BindingReconciler;
pub use execution::ExecutionReconciler;
pub use join::JoinReconciler;
pub use node::NodeReconciler;
pub use node_attestation::NodeAttestationReconciler;
pub use rule::RuleReconciler;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graph_types::{Hierarchy, Kind};

use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::provider::ProviderRegistry;
use crate::store::ObjectStore;

/// Shared handles every reconciler works with.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub providers: Arc<ProviderRegistry>,
    pub config: Arc<EngineConfig>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        providers: Arc<ProviderRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            providers,
            config: Arc::new(config),
        }
    }
}

/// Result of a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Children were created/updated/deleted, or a count or verdict moved.
    pub changed: bool,
    /// Look at this object again after the given delay.
    pub requeue_after: Option<Duration>,
}

impl Reconciled {
    pub fn changed(changed: bool) -> Self {
        Self {
            changed,
            requeue_after: None,
        }
    }

    /// The object is gone; nothing to do.
    pub fn gone() -> Self {
        Self::default()
    }

    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> Kind;

    async fn reconcile(
        &self,
        ctx: &Context,
        hierarchy: Hierarchy,
        name: &str,
    ) -> Result<Reconciled, ReconcileError>;
}

/// Every reconciler, in the order a batch pass runs them: structure top-down,
/// then status bottom-up.
pub fn reconcilers() -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(RuleReconciler),
        Arc::new(BindingReconciler),
        Arc::new(AttestationReconciler),
        Arc::new(NodeAttestationReconciler),
        Arc::new(ExecutionReconciler),
        Arc::new(JoinReconciler),
        Arc::new(NodeReconciler),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::provider::FakeProvider;
    use crate::store::{self, MemoryStore};
    use graph_types::{
        Attestation, AttestationSpec, Binding, BindingSpec, CascadePolicy, Definition, Node,
        NodeSpec, Object, Provider, ProviderSpec, Rule, RuleRef, RuleSpec,
    };

    pub const H: Hierarchy = Hierarchy::Resource;

    pub fn context() -> (Context, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut providers = ProviderRegistry::new();
        providers.force_register("fake", Arc::new(FakeProvider::new()));
        let ctx = Context::new(store.clone(), Arc::new(providers), EngineConfig::default());
        (ctx, store)
    }

    pub async fn put<T: Object>(ctx: &Context, object: T) -> T {
        store::create(ctx.store.as_ref(), object).await.unwrap()
    }

    pub fn node(name: &str, classes: &[&str], parents: &[&str]) -> Node {
        Node::new(
            name,
            H,
            NodeSpec {
                node_type: "host".into(),
                classes: classes.iter().map(|c| c.to_string()).collect(),
                parents: parents.iter().map(|p| p.to_string()).collect(),
            },
        )
    }

    pub fn rule(name: &str, applicable: &[&str], required: &[&str]) -> Rule {
        Rule::new(
            name,
            H,
            RuleSpec {
                definition: Definition {
                    code: name.into(),
                    version: "1".into(),
                    class: "network".into(),
                    category: "security".into(),
                    description: String::new(),
                },
                applicable_classes: applicable.iter().map(|c| c.to_string()).collect(),
                required_binding_classes: required.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    pub fn binding(name: &str, class: &str, rule: &str, targets: &[&str], cascade: CascadePolicy) -> Binding {
        Binding::new(
            name,
            H,
            BindingSpec {
                class: class.into(),
                rule_ref: RuleRef {
                    code: rule.into(),
                    version: "1".into(),
                },
                targets: targets.iter().map(|t| t.to_string()).collect(),
                cascade,
            },
        )
    }

    pub fn attestation(name: &str, binding: &str, provider: &str) -> Attestation {
        Attestation::new(
            name,
            H,
            AttestationSpec {
                binding_ref: binding.into(),
                provider_ref: provider.into(),
            },
        )
    }

    pub fn fake_provider(name: &str, result: &str) -> Provider {
        Provider::new(
            name,
            H,
            ProviderSpec {
                provider_type: "fake".into(),
                config: [("result".to_string(), result.to_string())].into_iter().collect(),
            },
        )
    }

    pub async fn reconcile(ctx: &Context, reconciler: &dyn Reconciler, name: &str) -> Reconciled {
        reconciler.reconcile(ctx, H, name).await.unwrap()
    }
}
