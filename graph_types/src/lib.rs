//! Compliance Graph Types - Foundation Data Model
//!
//! This crate contains the data structures every other part of the compliance
//! graph engine is built on: entity kinds, object metadata, typed relations,
//! per-kind specs and statuses, and the attestation result taxonomy.
//!
//! ## Architecture Level: Foundation
//!
//! The engine crate depends on this crate; this crate depends on nothing in the
//! workspace. It carries no store, provider or scheduling code.
//!
//! ## Two hierarchies, one model
//!
//! The engine maintains two parallel hierarchies (Resource/Requirement and
//! Component/Control). They share one set of types; every object carries the
//! [`Hierarchy`] it belongs to and kind names are rendered per hierarchy.
//!
//! ```text
//! Node ──┐                       Binding ──┐
//!        ├── Join(Node, Rule)              ├── Execution(Join, Binding)
//! Rule ──┘                                 │        │
//!                          Attestation ────┘        └── NodeAttestation ──> Provider
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// HIERARCHIES AND KINDS
// ============================================================================

/// Which of the two parallel hierarchies an object belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Hierarchy {
    #[default]
    Resource,
    Component,
}

impl Hierarchy {
    pub const ALL: [Hierarchy; 2] = [Hierarchy::Resource, Hierarchy::Component];
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hierarchy::Resource => write!(f, "resource"),
            Hierarchy::Component => write!(f, "component"),
        }
    }
}

/// Entity kinds managed by the engine.
///
/// `Node`, `Rule`, `Binding`, `Attestation` and `Provider` are declared by
/// users; `Join`, `Execution` and `NodeAttestation` are derived and fully owned
/// by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Node,
    Rule,
    Join,
    Binding,
    Execution,
    Attestation,
    NodeAttestation,
    Provider,
}

impl Kind {
    pub const ALL: [Kind; 8] = [
        Kind::Node,
        Kind::Rule,
        Kind::Join,
        Kind::Binding,
        Kind::Execution,
        Kind::Attestation,
        Kind::NodeAttestation,
        Kind::Provider,
    ];

    /// Kind name as rendered in the given hierarchy.
    pub fn display_name(self, hierarchy: Hierarchy) -> &'static str {
        match (self, hierarchy) {
            (Kind::Node, Hierarchy::Resource) => "Resource",
            (Kind::Node, Hierarchy::Component) => "Component",
            (Kind::Rule, Hierarchy::Resource) => "Requirement",
            (Kind::Rule, Hierarchy::Component) => "Control",
            (Kind::Join, Hierarchy::Resource) => "ResourceRequirement",
            (Kind::Join, Hierarchy::Component) => "ComponentControl",
            (Kind::Binding, Hierarchy::Resource) => "Implementation",
            (Kind::Binding, Hierarchy::Component) => "Assessment",
            (Kind::Execution, Hierarchy::Resource) => "ResourceImplementation",
            (Kind::Execution, Hierarchy::Component) => "ComponentAssessment",
            (Kind::Attestation, _) => "Attestation",
            (Kind::NodeAttestation, Hierarchy::Resource) => "ResourceAttestation",
            (Kind::NodeAttestation, Hierarchy::Component) => "ComponentAttestation",
            (Kind::Provider, _) => "AttestationProvider",
        }
    }

    /// True for kinds the engine derives and owns.
    pub fn is_derived(self) -> bool {
        matches!(self, Kind::Join | Kind::Execution | Kind::NodeAttestation)
    }
}

// ============================================================================
// RELATIONS (typed foreign keys)
// ============================================================================

/// Typed relation from a derived object to one of its ancestors.
///
/// Relations are indexed by the store, so "all Executions of Binding B" is a
/// relation lookup rather than a string selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    /// The Node the object is about.
    Node,
    /// The Node class a Join was matched on.
    NodeClass,
    /// The owning Rule's object name.
    Rule,
    /// `{code}_{version}` of the Rule definition.
    RuleRef,
    /// The Binding the object was generated from.
    Binding,
    /// The Attestation declaration the object was generated from.
    Attestation,
}

impl Relation {
    /// Label key used when rendering the relation, e.g. in errors.
    pub fn label(self, hierarchy: Hierarchy) -> &'static str {
        match (self, hierarchy) {
            (Relation::Node, Hierarchy::Resource) => "resource",
            (Relation::Node, Hierarchy::Component) => "component",
            (Relation::NodeClass, Hierarchy::Resource) => "resource-class",
            (Relation::NodeClass, Hierarchy::Component) => "component-class",
            (Relation::Rule, Hierarchy::Resource) => "requirement",
            (Relation::Rule, Hierarchy::Component) => "control",
            (Relation::RuleRef, Hierarchy::Resource) => "requirement-ref",
            (Relation::RuleRef, Hierarchy::Component) => "control-ref",
            (Relation::Binding, Hierarchy::Resource) => "implementation",
            (Relation::Binding, Hierarchy::Component) => "assessment",
            (Relation::Attestation, _) => "attestation",
        }
    }
}

// ============================================================================
// IDENTITY AND METADATA
// ============================================================================

/// Store key of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: Kind,
    pub hierarchy: Hierarchy,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, hierarchy: Hierarchy, name: impl Into<String>) -> Self {
        Self {
            kind,
            hierarchy,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.kind.display_name(self.hierarchy),
            self.name
        )
    }
}

/// Reference from a derived object to the object that generated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: Kind,
    pub name: String,
    pub uid: Uuid,
}

/// Metadata common to every object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub hierarchy: Hierarchy,
    /// Assigned by the store on create.
    #[serde(default = "Uuid::nil")]
    pub uid: Uuid,
    /// Bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store only when the spec changes.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub relations: BTreeMap<Relation, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy) -> Self {
        Self {
            name: name.into(),
            hierarchy,
            uid: Uuid::nil(),
            resource_version: 0,
            generation: 0,
            relations: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner: None,
            created_at: None,
        }
    }

    pub fn with_relation(mut self, relation: Relation, value: impl Into<String>) -> Self {
        self.relations.insert(relation, value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn relation(&self, relation: Relation) -> Option<&str> {
        self.relations.get(&relation).map(String::as_str)
    }

    /// Fetch a relation the caller cannot proceed without.
    ///
    /// A derived object missing one of its ancestor relations is corrupt, so
    /// this returns an error naming the object and the missing label.
    pub fn require(&self, kind: Kind, relation: Relation) -> Result<&str, TypeError> {
        self.relation(relation)
            .ok_or_else(|| TypeError::RelationMissing {
                kind: kind.display_name(self.hierarchy).to_string(),
                name: self.name.clone(),
                label: relation.label(self.hierarchy),
            })
    }
}

/// Name of a derived object: deterministic in its parents' names.
pub fn derived_name(parent: &str, child: &str) -> String {
    format!("{parent}-{child}")
}

// ============================================================================
// RULE DEFINITIONS
// ============================================================================

/// Semantic definition of a Rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub code: String,
    pub version: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl Definition {
    pub fn rule_ref(&self) -> RuleRef {
        RuleRef {
            code: self.code.clone(),
            version: self.version.clone(),
        }
    }
}

/// Reference to a Rule definition by code and version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub code: String,
    pub version: String,
}

impl RuleRef {
    pub fn matches(&self, definition: &Definition) -> bool {
        self.code == definition.code && self.version == definition.version
    }

    /// `{code}_{version}`, the value of the [`Relation::RuleRef`] relation.
    pub fn key(&self) -> String {
        format!("{}_{}", self.code, self.version)
    }
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.version)
    }
}

// ============================================================================
// NODE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub total_rules: usize,
    pub implemented_rules: usize,
    /// Tree children (by name) and whether each is compliant.
    pub children: BTreeMap<String, ChildCompliance>,
    /// `{code}:{version}` of every applicable Rule and whether it is implemented.
    pub rules: BTreeMap<String, RuleCompliance>,
    pub total_children: usize,
    pub compliant_children: usize,
    pub run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCompliance {
    pub compliant: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCompliance {
    pub implemented: bool,
}

/// A monitored entity (Resource / Component).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub meta: ObjectMeta,
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, spec: NodeSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name, hierarchy),
            spec,
            status: NodeStatus::default(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.spec.classes.iter().any(|c| c == class)
    }
}

// ============================================================================
// RULE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub definition: Definition,
    #[serde(default)]
    pub applicable_classes: Vec<String>,
    #[serde(default)]
    pub required_binding_classes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    /// Names of the Joins derived from this Rule.
    pub children: Vec<String>,
    /// Drift hash of the definition.
    pub definition_hash: String,
}

/// A compliance rule (Requirement / Control).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub meta: ObjectMeta,
    pub spec: RuleSpec,
    #[serde(default)]
    pub status: RuleStatus,
}

impl Rule {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, spec: RuleSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name, hierarchy),
            spec,
            status: RuleStatus::default(),
        }
    }
}

// ============================================================================
// JOIN (Node x Rule)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    pub definition: Definition,
    pub required_binding_classes: Vec<String>,
    /// Node class the Join was matched on.
    pub matched_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStatus {
    /// Executions that count toward this Join.
    pub executions: Vec<String>,
    pub total: usize,
    pub valid: usize,
    pub implemented: bool,
    pub run_at: Option<DateTime<Utc>>,
}

/// Derived link between one Node and one Rule (ResourceRequirement / ComponentControl).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub meta: ObjectMeta,
    pub spec: JoinSpec,
    #[serde(default)]
    pub status: JoinStatus,
}

// ============================================================================
// BINDING
// ============================================================================

/// Whether a Binding's scope expands to the targeted Nodes' known children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadePolicy {
    Cascade,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    pub class: String,
    pub rule_ref: RuleRef,
    /// Explicitly targeted Node names.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub cascade: CascadePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    /// Names of the Executions derived from this Binding.
    pub children: Vec<String>,
}

/// A concrete implementation of a Rule (Implementation / Assessment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub meta: ObjectMeta,
    pub spec: BindingSpec,
    #[serde(default)]
    pub status: BindingStatus,
}

impl Binding {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, spec: BindingSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name, hierarchy),
            spec,
            status: BindingStatus::default(),
        }
    }
}

// ============================================================================
// EXECUTION (Join x Binding)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    pub class: String,
    pub rule_ref: RuleRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub attestations: Vec<String>,
    pub total: usize,
    pub passed: usize,
    pub run_at: Option<DateTime<Utc>>,
}

/// Derived application of a Binding to one Node (ResourceImplementation / ComponentAssessment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub meta: ObjectMeta,
    pub spec: ExecutionSpec,
    #[serde(default)]
    pub status: ExecutionStatus,
}

// ============================================================================
// ATTESTATION DECLARATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationSpec {
    /// Binding whose Executions this attestation checks.
    pub binding_ref: String,
    /// Provider instance performing the check.
    pub provider_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationStatus {
    pub children: Vec<String>,
}

/// Declares that every Execution of a Binding is checked by a Provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub meta: ObjectMeta,
    pub spec: AttestationSpec,
    #[serde(default)]
    pub status: AttestationStatus,
}

impl Attestation {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, spec: AttestationSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name, hierarchy),
            spec,
            status: AttestationStatus::default(),
        }
    }
}

// ============================================================================
// NODE ATTESTATION (executable check)
// ============================================================================

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// The check ran and the condition holds.
    Pass,
    /// The check ran and the condition does not hold.
    Fail,
    /// The check could not determine the truth.
    Unknown,
    #[default]
    NotStarted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "Pass"),
            Verdict::Fail => write!(f, "Fail"),
            Verdict::Unknown => write!(f, "Unknown"),
            Verdict::NotStarted => write!(f, "Not Started"),
        }
    }
}

/// Best current knowledge produced by an attestation provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResult {
    pub result: Verdict,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

impl AttestationResult {
    pub fn new(result: Verdict, reason: impl Into<String>) -> Self {
        Self {
            result,
            logs: String::new(),
            reason: reason.into(),
            error: None,
            run_at: Some(Utc::now()),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttestationSpec {
    pub provider_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttestationStatus {
    pub result: AttestationResult,
}

/// Derived executable check for one Execution (ResourceAttestation / ComponentAttestation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttestation {
    pub meta: ObjectMeta,
    pub spec: NodeAttestationSpec,
    #[serde(default)]
    pub status: NodeAttestationStatus,
}

// ============================================================================
// PROVIDER INSTANCE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Registered provider type name, e.g. `command`.
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// A configured attestation provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub meta: ObjectMeta,
    pub spec: ProviderSpec,
}

impl Provider {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, spec: ProviderSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name, hierarchy),
            spec,
        }
    }
}

// ============================================================================
// TYPE-ERASED ENTITY
// ============================================================================

/// Any object the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Node(Node),
    Rule(Rule),
    Join(Join),
    Binding(Binding),
    Execution(Execution),
    Attestation(Attestation),
    NodeAttestation(NodeAttestation),
    Provider(Provider),
}

impl Entity {
    pub fn kind(&self) -> Kind {
        match self {
            Entity::Node(_) => Kind::Node,
            Entity::Rule(_) => Kind::Rule,
            Entity::Join(_) => Kind::Join,
            Entity::Binding(_) => Kind::Binding,
            Entity::Execution(_) => Kind::Execution,
            Entity::Attestation(_) => Kind::Attestation,
            Entity::NodeAttestation(_) => Kind::NodeAttestation,
            Entity::Provider(_) => Kind::Provider,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Entity::Node(o) => &o.meta,
            Entity::Rule(o) => &o.meta,
            Entity::Join(o) => &o.meta,
            Entity::Binding(o) => &o.meta,
            Entity::Execution(o) => &o.meta,
            Entity::Attestation(o) => &o.meta,
            Entity::NodeAttestation(o) => &o.meta,
            Entity::Provider(o) => &o.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Entity::Node(o) => &mut o.meta,
            Entity::Rule(o) => &mut o.meta,
            Entity::Join(o) => &mut o.meta,
            Entity::Binding(o) => &mut o.meta,
            Entity::Execution(o) => &mut o.meta,
            Entity::Attestation(o) => &mut o.meta,
            Entity::NodeAttestation(o) => &mut o.meta,
            Entity::Provider(o) => &mut o.meta,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(self.kind(), meta.hierarchy, meta.name.clone())
    }

    /// True when both entities are the same kind with equal specs.
    pub fn same_spec(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Node(a), Entity::Node(b)) => a.spec == b.spec,
            (Entity::Rule(a), Entity::Rule(b)) => a.spec == b.spec,
            (Entity::Join(a), Entity::Join(b)) => a.spec == b.spec,
            (Entity::Binding(a), Entity::Binding(b)) => a.spec == b.spec,
            (Entity::Execution(a), Entity::Execution(b)) => a.spec == b.spec,
            (Entity::Attestation(a), Entity::Attestation(b)) => a.spec == b.spec,
            (Entity::NodeAttestation(a), Entity::NodeAttestation(b)) => a.spec == b.spec,
            (Entity::Provider(a), Entity::Provider(b)) => a.spec == b.spec,
            _ => false,
        }
    }
}

/// Statically-typed view over [`Entity`].
pub trait Object: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: Kind;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: Entity) -> Result<Self, TypeError>;

    /// Overwrite everything the engine owns on a derived object (spec,
    /// relations, owner) from `template`, leaving identity and status alone.
    fn adopt(&mut self, template: &Self);

    fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(Self::KIND, meta.hierarchy, meta.name.clone())
    }

    fn name(&self) -> &str {
        &self.meta().name
    }
}

macro_rules! impl_object {
    ($ty:ident) => {
        impl Object for $ty {
            const KIND: Kind = Kind::$ty;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }

            fn from_entity(entity: Entity) -> Result<Self, TypeError> {
                match entity {
                    Entity::$ty(object) => Ok(object),
                    other => Err(TypeError::KindMismatch {
                        expected: Kind::$ty,
                        found: other.kind(),
                    }),
                }
            }

            fn adopt(&mut self, template: &Self) {
                self.spec = template.spec.clone();
                self.meta.relations = template.meta.relations.clone();
                self.meta.owner = template.meta.owner.clone();
            }
        }
    };
}

impl_object!(Node);
impl_object!(Rule);
impl_object!(Join);
impl_object!(Binding);
impl_object!(Execution);
impl_object!(Attestation);
impl_object!(NodeAttestation);
impl_object!(Provider);

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("object '{name}' ({kind}) does not contain expected label '{label}'")]
    RelationMissing {
        kind: String,
        name: String,
        label: &'static str,
    },

    #[error("expected a {expected:?} object, found {found:?}")]
    KindMismatch { expected: Kind, found: Kind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_follows_hierarchy() {
        assert_eq!(Kind::Join.display_name(Hierarchy::Resource), "ResourceRequirement");
        assert_eq!(Kind::Join.display_name(Hierarchy::Component), "ComponentControl");
        assert_eq!(
            Kind::NodeAttestation.display_name(Hierarchy::Component),
            "ComponentAttestation"
        );
    }

    #[test]
    fn test_require_names_object_and_label() {
        let meta = ObjectMeta::new("impl-web1", Hierarchy::Resource)
            .with_relation(Relation::Binding, "impl");

        assert_eq!(meta.require(Kind::Execution, Relation::Binding), Ok("impl"));

        let err = meta
            .require(Kind::Execution, Relation::Node)
            .unwrap_err()
            .to_string();
        assert!(err.contains("impl-web1"));
        assert!(err.contains("'resource'"));
    }

    #[test]
    fn test_rule_ref_matching() {
        let def = Definition {
            code: "R1".into(),
            version: "1".into(),
            ..Default::default()
        };
        assert!(def.rule_ref().matches(&def));
        assert_eq!(def.rule_ref().key(), "R1_1");
        assert_eq!(def.rule_ref().to_string(), "R1:1");

        let other = RuleRef {
            code: "R1".into(),
            version: "2".into(),
        };
        assert!(!other.matches(&def));
    }

    #[test]
    fn test_object_roundtrip_through_entity() {
        let node = Node::new("web1", Hierarchy::Resource, NodeSpec::default());
        let entity = node.clone().into_entity();
        assert_eq!(entity.kind(), Kind::Node);
        assert_eq!(Node::from_entity(entity).unwrap(), node);

        let wrong = Rule::new("r", Hierarchy::Resource, RuleSpec::default()).into_entity();
        assert!(matches!(
            Node::from_entity(wrong),
            Err(TypeError::KindMismatch {
                expected: Kind::Node,
                found: Kind::Rule
            })
        ));
    }

    #[test]
    fn test_adopt_keeps_identity_and_status() {
        let mut existing = Execution {
            meta: ObjectMeta::new("b-web1", Hierarchy::Resource),
            spec: ExecutionSpec {
                class: "old".into(),
                rule_ref: RuleRef::default(),
            },
            status: ExecutionStatus {
                total: 2,
                passed: 1,
                ..Default::default()
            },
        };
        existing.meta.uid = Uuid::new_v4();
        existing.meta.resource_version = 7;

        let template = Execution {
            meta: ObjectMeta::new("b-web1", Hierarchy::Resource)
                .with_relation(Relation::Node, "web1"),
            spec: ExecutionSpec {
                class: "firewall".into(),
                rule_ref: RuleRef::default(),
            },
            status: ExecutionStatus::default(),
        };

        let uid = existing.meta.uid;
        existing.adopt(&template);
        assert_eq!(existing.spec.class, "firewall");
        assert_eq!(existing.meta.relation(Relation::Node), Some("web1"));
        assert_eq!(existing.meta.uid, uid);
        assert_eq!(existing.meta.resource_version, 7);
        assert_eq!(existing.status.total, 2);
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::NotStarted.to_string(), "Not Started");
        assert_eq!(Verdict::default(), Verdict::NotStarted);
    }

    #[test]
    fn test_derived_name() {
        assert_eq!(derived_name("R1", "web1"), "R1-web1");
    }
}
