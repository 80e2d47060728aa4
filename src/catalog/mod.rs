//! Graph catalog
//!
//! [`Configuration`] is the whole graph as plain data: the declared objects
//! read from YAML by the [`loader`], and the derived objects plus statuses the
//! engine produced. It is what storage drivers persist and what reports read.

pub mod loader;
pub mod report;
pub mod storage;

pub use loader::{load_dirs, LoadError};
pub use report::{render, OutputFormat, ReportMode};
pub use storage::{open_driver, FileStorage, StorageDriver, StorageError};

use graph_types::{
    Attestation, Binding, Entity, Execution, Hierarchy, Join, Kind, Node, NodeAttestation, Object,
    Provider, Rule,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{ObjectStore, Selector, StoreError};

/// Serialized graph: declarations first, then engine-derived objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub nodes: Vec<Node>,
    pub rules: Vec<Rule>,
    pub bindings: Vec<Binding>,
    pub attestations: Vec<Attestation>,
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub executions: Vec<Execution>,
    #[serde(default)]
    pub node_attestations: Vec<NodeAttestation>,
}

impl Configuration {
    pub fn len(&self) -> usize {
        self.nodes.len()
            + self.rules.len()
            + self.bindings.len()
            + self.attestations.len()
            + self.providers.len()
            + self.joins.len()
            + self.executions.len()
            + self.node_attestations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add one object to the list for its kind.
    pub fn push(&mut self, entity: Entity) {
        match entity {
            Entity::Node(o) => self.nodes.push(o),
            Entity::Rule(o) => self.rules.push(o),
            Entity::Binding(o) => self.bindings.push(o),
            Entity::Attestation(o) => self.attestations.push(o),
            Entity::Provider(o) => self.providers.push(o),
            Entity::Join(o) => self.joins.push(o),
            Entity::Execution(o) => self.executions.push(o),
            Entity::NodeAttestation(o) => self.node_attestations.push(o),
        }
    }

    /// Every object, owners before the objects they own.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        fn erase<T: Object>(objects: &[T]) -> impl Iterator<Item = Entity> + '_ {
            objects.iter().cloned().map(Object::into_entity)
        }

        erase(&self.providers)
            .chain(erase(&self.nodes))
            .chain(erase(&self.rules))
            .chain(erase(&self.bindings))
            .chain(erase(&self.attestations))
            .chain(erase(&self.joins))
            .chain(erase(&self.executions))
            .chain(erase(&self.node_attestations))
    }

    /// Snapshot every object of every kind in both hierarchies.
    pub async fn from_store(store: &dyn ObjectStore) -> Result<Self, StoreError> {
        let mut configuration = Configuration::default();
        for kind in Kind::ALL {
            for hierarchy in Hierarchy::ALL {
                for entity in store.list(kind, hierarchy, &Selector::all()).await? {
                    configuration.push(entity);
                }
            }
        }
        Ok(configuration)
    }

    /// Create every object in `store`. Identity (uid) is kept, so owner
    /// references of derived objects stay valid.
    pub async fn seed(&self, store: &dyn ObjectStore) -> Result<usize, StoreError> {
        let mut created = 0;
        for entity in self.entities() {
            store.create(entity).await?;
            created += 1;
        }
        info!(objects = created, "Seeded store");
        Ok(created)
    }

    pub fn node(&self, hierarchy: Hierarchy, name: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.meta.hierarchy == hierarchy && n.meta.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, MemoryStore};
    use graph_types::{NodeSpec, ObjectMeta, OwnerRef, Relation};

    #[tokio::test]
    async fn test_store_round_trip_keeps_identity() {
        let store = MemoryStore::new();
        let web1 = store::create(
            &store,
            Node::new("web1", Hierarchy::Resource, NodeSpec::default()),
        )
        .await
        .unwrap();
        let join = Join {
            meta: ObjectMeta::new("R1-web1", Hierarchy::Resource)
                .with_relation(Relation::Node, "web1")
                .with_owner(OwnerRef {
                    kind: Kind::Node,
                    name: "web1".into(),
                    uid: web1.meta.uid,
                }),
            spec: Default::default(),
            status: Default::default(),
        };
        store::create(&store, join).await.unwrap();
        store::create(
            &store,
            Node::new("db1", Hierarchy::Component, NodeSpec::default()),
        )
        .await
        .unwrap();

        let snapshot = Configuration::from_store(&store).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.node(Hierarchy::Component, "db1").is_some());

        let copy = MemoryStore::new();
        assert_eq!(snapshot.seed(&copy).await.unwrap(), 3);
        let restored = Configuration::from_store(&copy).await.unwrap();
        assert_eq!(restored.joins[0].meta.owner, snapshot.joins[0].meta.owner);
        assert_eq!(restored.nodes, snapshot.nodes);

        // Owner cascade still works after the copy.
        copy.delete(&web1.key()).await.unwrap();
        assert!(Configuration::from_store(&copy).await.unwrap().joins.is_empty());
    }
}
