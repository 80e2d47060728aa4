//! Class-Matching Derivation
//!
//! Pure functions from a parent object plus the current graph snapshot to the
//! desired set of derived children, keyed by their deterministic names. The
//! lifecycle reconciler diffs these maps against the store.

use std::collections::{BTreeMap, BTreeSet};

use graph_types::{
    derived_name, Attestation, Binding, Execution, ExecutionSpec, Join, JoinSpec, Kind, Node,
    NodeAttestation, NodeAttestationSpec, Object, ObjectMeta, OwnerRef, Relation, Rule,
    TypeError,
};

fn owner_ref<T: Object>(parent: &T) -> OwnerRef {
    OwnerRef {
        kind: T::KIND,
        name: parent.name().to_string(),
        uid: parent.meta().uid,
    }
}

/// First class of `node` the rule applies to, in the node's own class order.
pub fn matched_class<'a>(rule: &Rule, node: &'a Node) -> Option<&'a str> {
    node.spec
        .classes
        .iter()
        .find(|class| rule.spec.applicable_classes.contains(class))
        .map(String::as_str)
}

/// One Join per Node sharing at least one class with the Rule's applicable
/// classes. A node matching on several classes still yields a single Join.
pub fn desired_joins(rule: &Rule, nodes: &[Node]) -> BTreeMap<String, Join> {
    let hierarchy = rule.meta.hierarchy;
    let rule_ref = rule.spec.definition.rule_ref();

    nodes
        .iter()
        .filter(|node| node.meta.hierarchy == hierarchy)
        .filter_map(|node| {
            let class = matched_class(rule, node)?;
            let name = derived_name(rule.name(), node.name());
            let join = Join {
                meta: ObjectMeta::new(name.clone(), hierarchy)
                    .with_relation(Relation::Node, node.name())
                    .with_relation(Relation::NodeClass, class)
                    .with_relation(Relation::Rule, rule.name())
                    .with_relation(Relation::RuleRef, rule_ref.key())
                    .with_owner(owner_ref(rule)),
                spec: JoinSpec {
                    definition: rule.spec.definition.clone(),
                    required_binding_classes: rule.spec.required_binding_classes.clone(),
                    matched_class: class.to_string(),
                },
                status: Default::default(),
            };
            Some((name, join))
        })
        .collect()
}

/// Node names a Binding applies to.
///
/// Explicit targets, plus for cascading bindings every name in each target's
/// current `children` map. Names with no Node in the snapshot are dropped.
pub fn binding_scope(binding: &Binding, nodes: &[Node]) -> BTreeSet<String> {
    let by_name: BTreeMap<&str, &Node> = nodes
        .iter()
        .filter(|node| node.meta.hierarchy == binding.meta.hierarchy)
        .map(|node| (node.name(), node))
        .collect();

    let mut scope: BTreeSet<String> = binding.spec.targets.iter().cloned().collect();
    if binding.spec.cascade == graph_types::CascadePolicy::Cascade {
        for target in &binding.spec.targets {
            if let Some(node) = by_name.get(target.as_str()) {
                scope.extend(node.status.children.keys().cloned());
            }
        }
    }

    scope.retain(|name| by_name.contains_key(name.as_str()));
    scope
}

/// One Execution per Node in the Binding's scope.
pub fn desired_executions(binding: &Binding, nodes: &[Node]) -> BTreeMap<String, Execution> {
    let hierarchy = binding.meta.hierarchy;
    let rule_ref = &binding.spec.rule_ref;

    binding_scope(binding, nodes)
        .into_iter()
        .map(|node| {
            let name = derived_name(binding.name(), &node);
            let execution = Execution {
                meta: ObjectMeta::new(name.clone(), hierarchy)
                    .with_relation(Relation::Node, node)
                    .with_relation(Relation::Binding, binding.name())
                    .with_relation(Relation::RuleRef, rule_ref.key())
                    .with_owner(owner_ref(binding)),
                spec: ExecutionSpec {
                    class: binding.spec.class.clone(),
                    rule_ref: rule_ref.clone(),
                },
                status: Default::default(),
            };
            (name, execution)
        })
        .collect()
}

/// One NodeAttestation per Execution of the attested Binding.
///
/// Fails if an Execution lacks the relations its NodeAttestation inherits.
pub fn desired_node_attestations(
    attestation: &Attestation,
    executions: &[Execution],
) -> Result<BTreeMap<String, NodeAttestation>, TypeError> {
    let hierarchy = attestation.meta.hierarchy;
    let mut desired = BTreeMap::new();

    for execution in executions {
        if execution.meta.hierarchy != hierarchy
            || execution.meta.relation(Relation::Binding)
                != Some(attestation.spec.binding_ref.as_str())
        {
            continue;
        }
        let node = execution.meta.require(Kind::Execution, Relation::Node)?;
        let rule_ref = execution.meta.require(Kind::Execution, Relation::RuleRef)?;

        let name = derived_name(attestation.name(), execution.name());
        let node_attestation = NodeAttestation {
            meta: ObjectMeta::new(name.clone(), hierarchy)
                .with_relation(Relation::Node, node)
                .with_relation(Relation::Binding, attestation.spec.binding_ref.clone())
                .with_relation(Relation::RuleRef, rule_ref)
                .with_relation(Relation::Attestation, attestation.name())
                .with_owner(owner_ref(attestation)),
            spec: NodeAttestationSpec {
                provider_ref: attestation.spec.provider_ref.clone(),
            },
            status: Default::default(),
        };
        desired.insert(name, node_attestation);
    }

    Ok(desired)
}
