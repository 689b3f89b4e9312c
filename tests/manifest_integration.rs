//! ---
//! anvil_section: "15-testing-qa-runbook"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Package constraint manifests exercised through the command path."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::sync::Arc;

use anvil_api::{ApiServerBuilder, CommandExecutor, StatusProvider};
use anvil_common::config::HeartbeatConfig;
use anvil_common::version::VersionInfo;
use anvil_core::modes::ModeRegistry;
use anvil_core::{Agent, OverlordClient};
use anvil_hardware::StaticHardwareManager;
use anvil_manifest::{CmpOp, Manifest, ManifestError, Record};
use reqwest::StatusCode;
use semver::Version;
use serde_json::{json, Value};

const IMAGE_MANIFEST: &str = "\
# Image tooling, applied in listed order.
hacking>=3.0.0,<3.1.0 # Apache-2.0
stestr>=1.0.0 # Apache-2.0
doc8>=0.6.0 # Apache-2.0
";

fn local_agent(cache_dir: &std::path::Path) -> Arc<Agent> {
    let hardware = Arc::new(StaticHardwareManager::example());
    Agent::with_parts(
        VersionInfo::current(),
        "52:54:00:12:34:56".to_owned(),
        "http://127.0.0.1:9999/".to_owned(),
        hardware.clone(),
        ModeRegistry::standard(hardware, cache_dir.to_owned()),
        OverlordClient::new("http://127.0.0.1:1"),
        HeartbeatConfig::default(),
        None,
    )
}

fn image_params(id: &str, manifest: &str) -> Value {
    json!({
        "image": {
            "id": id,
            "urls": ["http://images.deploy.local/img"],
            "package_manifest": manifest,
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn image_manifests_are_validated_on_submission() {
    let temp = tempfile::tempdir().unwrap();
    let agent = local_agent(temp.path());

    let api = ApiServerBuilder::new(
        "127.0.0.1:0".parse().unwrap(),
        agent.clone() as Arc<dyn StatusProvider>,
        agent.clone() as Arc<dyn CommandExecutor>,
    )
    .spawn()
    .await
    .unwrap();
    let base = format!("http://{}", api.local_addr());
    let client = reqwest::Client::new();

    // A duplicate package in the image manifest is rejected before the
    // image is accepted, and nothing lands in the command log.
    let rejected = client
        .post(format!("{base}/v1/commands"))
        .json(&json!({
            "name": "standby.cache_image",
            "params": image_params("broken", "stestr>=1.0.0\nstestr>=2.0.0\n"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let body: Value = rejected.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("duplicate package"));

    let listed: Vec<Value> = client
        .get(format!("{base}/v1/commands"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());

    // A well-formed manifest passes through to staging.
    let accepted = client
        .post(format!("{base}/v1/commands"))
        .json(&json!({
            "name": "standby.cache_image",
            "params": image_params("golden", IMAGE_MANIFEST),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    api.shutdown().await.unwrap();
}

// Well-formedness properties of the manifest format itself, checked against
// the documented record grammar.

#[test]
fn documented_example_records_parse_to_their_fields() {
    let record = Record::parse("hacking>=3.0.0,<3.1.0 # Apache-2.0").unwrap();
    assert_eq!(record.name, "hacking");
    assert_eq!(
        record
            .constraints
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        vec![">=3.0.0", "<3.1.0"]
    );
    assert_eq!(record.license.as_deref(), Some("Apache-2.0"));

    let record = Record::parse("stestr>=1.0.0 # Apache-2.0").unwrap();
    assert_eq!(record.name, "stestr");
    assert_eq!(record.constraints.len(), 1);
    assert_eq!(record.constraints[0].op, CmpOp::Ge);
    assert_eq!(record.license.as_deref(), Some("Apache-2.0"));
}

#[test]
fn every_non_comment_line_must_parse() {
    let manifest = Manifest::parse(IMAGE_MANIFEST).unwrap();
    assert_eq!(manifest.len(), 3);

    let err = Manifest::parse("hacking>=3.0.0\nnot a record line\n").unwrap_err();
    assert!(matches!(err, ManifestError::Record { line: 2, .. }));
}

#[test]
fn duplicate_package_names_are_rejected_across_records() {
    let err = Manifest::parse("a>=1.0\nb>=1.0\na<2.0\n").unwrap_err();
    assert_eq!(
        err,
        ManifestError::DuplicatePackage {
            name: "a".to_owned(),
            first: 1,
            second: 3,
        }
    );
}

#[test]
fn record_order_survives_parse_and_render() {
    let manifest = Manifest::parse(IMAGE_MANIFEST).unwrap();
    let names: Vec<_> = manifest.records().map(|r| r.name.clone()).collect();
    assert_eq!(names, ["hacking", "stestr", "doc8"]);
    assert_eq!(manifest.render(), IMAGE_MANIFEST);
}

#[test]
fn constraint_windows_bound_candidate_versions() {
    let manifest = Manifest::parse(IMAGE_MANIFEST).unwrap();
    assert!(manifest.accepts("hacking", &Version::new(3, 0, 9)));
    assert!(!manifest.accepts("hacking", &Version::new(3, 1, 0)));
    assert!(manifest.accepts("stestr", &Version::new(4, 2, 0)));
    assert!(!manifest.accepts("stestr", &Version::new(0, 9, 0)));
}
