//! Graph status reports
//!
//! Three levels of detail, each as tab-separated rows or JSON:
//!
//! - `summary`: one row per Node with its rule counts
//! - `detailed`: one row per leaf attestation, walking Node, Join, Execution
//!   and NodeAttestation; an empty level yields a single `N/A` row
//! - `all`: every object in the graph

use clap::ValueEnum;
use graph_types::{
    Entity, Execution, Join, Node, NodeAttestation, Object, ObjectMeta, Relation,
};
use serde::Serialize;

use super::Configuration;
use crate::status;

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportMode {
    #[default]
    Summary,
    Detailed,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Tsv,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub node: String,
    pub hierarchy: String,
    pub implemented: bool,
    pub total_rules: usize,
    pub implemented_rules: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRow {
    pub node: String,
    pub rule: String,
    pub binding: String,
    pub attestation: String,
    pub evaluated_at: String,
    pub result: String,
    pub logs: String,
}

impl DetailRow {
    fn empty(node: &str) -> Self {
        Self {
            node: node.to_string(),
            rule: NOT_AVAILABLE.into(),
            binding: NOT_AVAILABLE.into(),
            attestation: NOT_AVAILABLE.into(),
            evaluated_at: NOT_AVAILABLE.into(),
            result: NOT_AVAILABLE.into(),
            logs: NOT_AVAILABLE.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRow {
    pub kind: &'static str,
    pub hierarchy: String,
    pub name: String,
    pub owner: Option<String>,
    pub status: serde_json::Value,
}

fn sorted_nodes(configuration: &Configuration) -> Vec<&Node> {
    let mut nodes: Vec<&Node> = configuration.nodes.iter().collect();
    nodes.sort_by(|a, b| {
        (a.meta.hierarchy, &a.meta.name).cmp(&(b.meta.hierarchy, &b.meta.name))
    });
    nodes
}

fn related(meta: &ObjectMeta, node: &Node, terms: &[(Relation, &str)]) -> bool {
    meta.hierarchy == node.meta.hierarchy
        && terms
            .iter()
            .all(|(relation, value)| meta.relation(*relation) == Some(*value))
}

pub fn summary_rows(configuration: &Configuration) -> Vec<SummaryRow> {
    sorted_nodes(configuration)
        .into_iter()
        .map(|node| SummaryRow {
            node: node.meta.name.clone(),
            hierarchy: node.meta.hierarchy.to_string(),
            implemented: status::node_compliant(node),
            total_rules: node.status.total_rules,
            implemented_rules: node.status.implemented_rules,
        })
        .collect()
}

pub fn detailed_rows(configuration: &Configuration) -> Vec<DetailRow> {
    let mut rows = Vec::new();
    for node in sorted_nodes(configuration) {
        let name = node.meta.name.as_str();
        let joins: Vec<&Join> = configuration
            .joins
            .iter()
            .filter(|j| related(&j.meta, node, &[(Relation::Node, name)]))
            .collect();
        if joins.is_empty() {
            rows.push(DetailRow::empty(name));
            continue;
        }

        for join in joins {
            let rule = join.meta.relation(Relation::Rule).unwrap_or(NOT_AVAILABLE);
            let rule_ref = join.meta.relation(Relation::RuleRef).unwrap_or_default();
            let executions: Vec<&Execution> = configuration
                .executions
                .iter()
                .filter(|e| {
                    related(&e.meta, node, &[(Relation::Node, name), (Relation::RuleRef, rule_ref)])
                })
                .collect();
            if executions.is_empty() {
                rows.push(DetailRow {
                    rule: rule.to_string(),
                    ..DetailRow::empty(name)
                });
                continue;
            }

            for execution in executions {
                let binding = execution
                    .meta
                    .relation(Relation::Binding)
                    .unwrap_or(NOT_AVAILABLE);
                let attestations: Vec<&NodeAttestation> = configuration
                    .node_attestations
                    .iter()
                    .filter(|a| {
                        related(&a.meta, node, &[(Relation::Node, name), (Relation::Binding, binding)])
                    })
                    .collect();
                if attestations.is_empty() {
                    rows.push(DetailRow {
                        rule: rule.to_string(),
                        binding: binding.to_string(),
                        ..DetailRow::empty(name)
                    });
                    continue;
                }

                for attestation in attestations {
                    let result = &attestation.status.result;
                    rows.push(DetailRow {
                        node: name.to_string(),
                        rule: rule.to_string(),
                        binding: binding.to_string(),
                        attestation: attestation
                            .meta
                            .relation(Relation::Attestation)
                            .unwrap_or(attestation.name())
                            .to_string(),
                        evaluated_at: result
                            .run_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| NOT_AVAILABLE.into()),
                        result: result.result.to_string(),
                        logs: result.logs.clone(),
                    });
                }
            }
        }
    }
    rows
}

fn status_json(entity: &Entity) -> serde_json::Result<serde_json::Value> {
    match entity {
        Entity::Node(o) => serde_json::to_value(&o.status),
        Entity::Rule(o) => serde_json::to_value(&o.status),
        Entity::Join(o) => serde_json::to_value(&o.status),
        Entity::Binding(o) => serde_json::to_value(&o.status),
        Entity::Execution(o) => serde_json::to_value(&o.status),
        Entity::Attestation(o) => serde_json::to_value(&o.status),
        Entity::NodeAttestation(o) => serde_json::to_value(&o.status),
        Entity::Provider(_) => Ok(serde_json::Value::Null),
    }
}

pub fn object_rows(configuration: &Configuration) -> serde_json::Result<Vec<ObjectRow>> {
    configuration
        .entities()
        .map(|entity| {
            let meta = entity.meta();
            Ok(ObjectRow {
                kind: entity.kind().display_name(meta.hierarchy),
                hierarchy: meta.hierarchy.to_string(),
                name: meta.name.clone(),
                owner: meta.owner.as_ref().map(|o| o.name.clone()),
                status: status_json(&entity)?,
            })
        })
        .collect()
}

/// Escape a field so it cannot break the row/column structure.
fn tsv_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn tsv<const N: usize>(header: [&str; N], rows: impl IntoIterator<Item = [String; N]>) -> String {
    let mut out = header.join("\t");
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row.iter().map(|f| tsv_field(f)).collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

/// Render `configuration` in the requested mode and format.
pub fn render(
    configuration: &Configuration,
    mode: ReportMode,
    format: OutputFormat,
) -> serde_json::Result<String> {
    match (mode, format) {
        (ReportMode::Summary, OutputFormat::Json) => {
            serde_json::to_string_pretty(&summary_rows(configuration))
        }
        (ReportMode::Summary, OutputFormat::Tsv) => Ok(tsv(
            ["node", "hierarchy", "implemented", "total_rules", "implemented_rules"],
            summary_rows(configuration).into_iter().map(|r| {
                [
                    r.node,
                    r.hierarchy,
                    r.implemented.to_string(),
                    r.total_rules.to_string(),
                    r.implemented_rules.to_string(),
                ]
            }),
        )),
        (ReportMode::Detailed, OutputFormat::Json) => {
            serde_json::to_string_pretty(&detailed_rows(configuration))
        }
        (ReportMode::Detailed, OutputFormat::Tsv) => Ok(tsv(
            ["node", "rule", "binding", "attestation", "evaluated_at", "result", "logs"],
            detailed_rows(configuration).into_iter().map(|r| {
                [
                    r.node,
                    r.rule,
                    r.binding,
                    r.attestation,
                    r.evaluated_at,
                    r.result,
                    r.logs,
                ]
            }),
        )),
        (ReportMode::All, OutputFormat::Json) => serde_json::to_string_pretty(configuration),
        (ReportMode::All, OutputFormat::Tsv) => {
            let rows = object_rows(configuration)?;
            Ok(tsv(
                ["kind", "hierarchy", "name", "owner", "status"],
                rows.into_iter().map(|r| {
                    [
                        r.kind.to_string(),
                        r.hierarchy,
                        r.name,
                        r.owner.unwrap_or_else(|| NOT_AVAILABLE.into()),
                        r.status.to_string(),
                    ]
                }),
            ))
        }
    }
}
