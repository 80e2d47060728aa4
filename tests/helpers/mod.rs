//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use compliance_graph::store::{self, MemoryStore, ObjectStore};
use compliance_graph::{Engine, EngineConfig, ProviderRegistry};
use graph_types::{
    Attestation, AttestationSpec, Binding, BindingSpec, CascadePolicy, Definition, Hierarchy,
    Node, NodeSpec, Object, Provider, ProviderSpec, Rule, RuleRef, RuleSpec,
};

pub const H: Hierarchy = Hierarchy::Resource;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let providers = ProviderRegistry::with_builtin().expect("builtin providers");
        let engine = Engine::new(store.clone(), Arc::new(providers), config);
        Self { store, engine }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub async fn put<T: Object>(&self, object: T) -> T {
        store::create(self.store(), object).await.expect("create")
    }

    pub async fn get<T: Object>(&self, name: &str) -> T {
        store::get(self.store(), H, name).await.expect("get")
    }

    pub async fn find<T: Object>(&self, name: &str) -> Option<T> {
        store::find(self.store(), H, name).await.expect("find")
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn node(name: &str, classes: &[&str], parents: &[&str]) -> Node {
    Node::new(
        name,
        H,
        NodeSpec {
            node_type: "host".into(),
            classes: strings(classes),
            parents: strings(parents),
        },
    )
}

pub fn rule(code: &str, applicable: &[&str], required: &[&str]) -> Rule {
    Rule::new(
        code,
        H,
        RuleSpec {
            definition: Definition {
                code: code.into(),
                version: "1".into(),
                class: "network".into(),
                category: "security".into(),
                description: format!("{code} must hold"),
            },
            applicable_classes: strings(applicable),
            required_binding_classes: strings(required),
        },
    )
}

pub fn binding(
    name: &str,
    class: &str,
    rule: &str,
    targets: &[&str],
    cascade: CascadePolicy,
) -> Binding {
    Binding::new(
        name,
        H,
        BindingSpec {
            class: class.into(),
            rule_ref: RuleRef {
                code: rule.into(),
                version: "1".into(),
            },
            targets: strings(targets),
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
            config: [("result".to_string(), result.to_string())]
                .into_iter()
                .collect(),
        },
    )
}
