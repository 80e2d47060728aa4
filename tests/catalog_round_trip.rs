//! Declarations on disk through load, persist, attest and report.
//!
//! Run with: cargo test --test catalog_round_trip

mod helpers;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use compliance_graph::catalog::{self, OutputFormat, ReportMode};
use compliance_graph::{Configuration, EngineConfig};
use graph_types::Hierarchy;
use helpers::Harness;

fn write(root: &Path, file: &str, text: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn declare(root: &Path) {
    write(
        root,
        "resources/web1.yaml",
        r#"
kind: Resource
name: web1
spec:
  type: host
  classes: [public]
"#,
    );
    write(
        root,
        "resources/app1.yaml",
        r#"
kind: Resource
name: app1
spec:
  type: service
  classes: [internal]
  parents: [web1]
"#,
    );
    write(
        root,
        "requirements/r1.yaml",
        r#"
kind: Requirement
name: R1
spec:
  definition:
    code: R1
    version: "1"
    class: network
    category: security
    description: Public hosts sit behind a firewall
  applicableClasses: [public]
  requiredBindingClasses: [firewall]
"#,
    );
    write(
        root,
        "implementations/b1.yaml",
        r#"
kind: Implementation
name: B1
spec:
  class: firewall
  ruleRef: {code: R1, version: "1"}
  targets: [web1]
"#,
    );
    write(
        root,
        "attestations/a1.yaml",
        r#"
kind: Attestation
name: A1
spec:
  bindingRef: B1
  providerRef: always-pass
"#,
    );
    write(
        root,
        "providers/always-pass.yaml",
        r#"
kind: AttestationProvider
name: always-pass
spec:
  type: fake
  config:
    result: Pass
"#,
    );
}

#[tokio::test]
async fn test_load_attest_report() {
    let dir = tempfile::tempdir().unwrap();
    declare(dir.path());

    // load
    let configuration = catalog::load_dirs(&[dir.path()]).unwrap();
    assert_eq!(configuration.nodes.len(), 2);
    assert_eq!(configuration.providers.len(), 1);
    assert!(configuration.joins.is_empty());

    let driver_config: BTreeMap<String, String> = [(
        "file".to_string(),
        dir.path().join("graph.bin").display().to_string(),
    )]
    .into_iter()
    .collect();
    let storage = catalog::open_driver("file", &driver_config).unwrap();
    storage.save(&configuration).await.unwrap();

    // attest
    let harness = Harness::with_config(EngineConfig::default());
    storage.load().await.unwrap().seed(harness.store()).await.unwrap();
    let report = harness.engine.converge().await.unwrap();
    assert!(report.converged);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    storage
        .save(&Configuration::from_store(harness.store()).await.unwrap())
        .await
        .unwrap();

    // report
    let attested = storage.load().await.unwrap();
    assert_eq!(attested.joins.len(), 1);
    assert_eq!(attested.executions.len(), 1);
    assert_eq!(attested.node_attestations.len(), 1);

    let summary = catalog::render(&attested, ReportMode::Summary, OutputFormat::Tsv).unwrap();
    assert!(summary.contains("web1\tresource\ttrue\t1\t1"), "{summary}");
    assert!(summary.contains("app1\tresource\ttrue\t0\t0"), "{summary}");

    let detailed = catalog::render(&attested, ReportMode::Detailed, OutputFormat::Json).unwrap();
    let rows: serde_json::Value = serde_json::from_str(&detailed).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["node"], "app1");
    assert_eq!(rows[0]["rule"], "N/A");
    assert_eq!(rows[1]["node"], "web1");
    assert_eq!(rows[1]["attestation"], "A1");
    assert_eq!(rows[1]["result"], "Pass");

    let web1 = attested.node(Hierarchy::Resource, "web1").unwrap();
    assert_eq!(web1.status.compliant_children, 1);
}

#[tokio::test]
async fn test_reseeded_graph_is_already_converged() {
    let dir = tempfile::tempdir().unwrap();
    declare(dir.path());

    let first = Harness::new();
    catalog::load_dirs(&[dir.path()])
        .unwrap()
        .seed(first.store())
        .await
        .unwrap();
    first.engine.converge().await.unwrap();
    let snapshot = Configuration::from_store(first.store()).await.unwrap();

    // A restarted engine picks up where the last one stopped.
    let second = Harness::new();
    snapshot.seed(second.store()).await.unwrap();
    let pass = second.engine.run_pass().await.unwrap();
    assert_eq!(pass.changed, 0);
    assert!(pass.errors.is_empty());
}
