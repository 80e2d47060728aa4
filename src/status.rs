//! Status Aggregator
//!
//! Counts total and valid children at each level and derives the
//! `implemented` verdict. A parent with no applicable children is never
//! implemented.

use std::collections::BTreeMap;

use graph_types::{
    Execution, ExecutionStatus, Join, JoinStatus, Node, NodeAttestation, NodeStatus,
    RuleCompliance, Verdict,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollup {
    pub total: usize,
    pub valid: usize,
}

impl Rollup {
    pub fn from_flags(flags: impl IntoIterator<Item = bool>) -> Self {
        flags.into_iter().fold(Self::default(), |acc, valid| Self {
            total: acc.total + 1,
            valid: acc.valid + usize::from(valid),
        })
    }

    pub fn implemented(&self) -> bool {
        self.total == self.valid && self.total > 0
    }
}

pub fn execution_status_rollup(status: &ExecutionStatus) -> Rollup {
    Rollup {
        total: status.total,
        valid: status.passed,
    }
}

pub fn join_status_rollup(status: &JoinStatus) -> Rollup {
    Rollup {
        total: status.total,
        valid: status.valid,
    }
}

/// Passed attestations over all attestations of one Execution.
pub fn execution_rollup(attestations: &[NodeAttestation]) -> Rollup {
    Rollup::from_flags(
        attestations
            .iter()
            .map(|a| a.status.result.result == Verdict::Pass),
    )
}

/// Executions counting toward a Join: right rule reference and a class the
/// Join requires. Everything else is ignored, not counted as invalid.
pub fn counted_executions<'a>(join: &Join, executions: &'a [Execution]) -> Vec<&'a Execution> {
    executions
        .iter()
        .filter(|e| {
            e.spec.rule_ref.matches(&join.spec.definition)
                && join.spec.required_binding_classes.contains(&e.spec.class)
        })
        .collect()
}

pub fn join_rollup(join: &Join, executions: &[Execution]) -> Rollup {
    Rollup::from_flags(
        counted_executions(join, executions)
            .into_iter()
            .map(|e| execution_status_rollup(&e.status).implemented()),
    )
}

/// Rule-level rollup of a Node plus the per-rule implemented map, keyed by
/// `{code}:{version}`.
pub fn node_rollup(joins: &[Join]) -> (Rollup, BTreeMap<String, RuleCompliance>) {
    let rules = joins
        .iter()
        .map(|join| {
            let implemented = join_status_rollup(&join.status).implemented();
            (
                join.spec.definition.rule_ref().to_string(),
                RuleCompliance { implemented },
            )
        })
        .collect::<BTreeMap<_, _>>();
    let rollup = Rollup {
        total: joins.len(),
        valid: joins
            .iter()
            .filter(|join| join_status_rollup(&join.status).implemented())
            .count(),
    };
    (rollup, rules)
}

/// A child Node is compliant when every one of its rules is implemented.
pub fn node_compliant(node: &Node) -> bool {
    node.status.total_rules == node.status.implemented_rules
}

/// Refresh `total_children`/`compliant_children` from the children map.
pub fn recount_children(status: &mut NodeStatus) {
    status.total_children = status.children.len();
    status.compliant_children = status.children.values().filter(|c| c.compliant).count();
}
