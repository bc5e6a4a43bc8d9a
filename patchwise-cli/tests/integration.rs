use std::process::Command;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(name: &str) -> String {
    let dir = env!("CARGO_MANIFEST_DIR");
    format!("{dir}/tests/fixtures/{name}")
}

fn patchwise() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_patchwise"));
    cmd.env_remove("PATCHWISE_DATABASE_URL")
        .env_remove("PATCHWISE_NPM_REGISTRY_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn run_patchwise(args: &[&str]) -> std::process::Output {
    patchwise()
        .args(args)
        .output()
        .expect("failed to execute")
}

fn stdout_of(args: &[&str]) -> String {
    let output = run_patchwise(args);
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn json_of(args: &[&str]) -> Value {
    serde_json::from_str(&stdout_of(args)).expect("stdout is not JSON")
}

fn offline_args<'a>(sbom: &'a str, vulns: &'a str, knowledge: &'a str) -> Vec<&'a str> {
    vec!["--sbom", sbom, "--vulns", vulns, "--knowledge-file", knowledge]
}

// ---------------------------------------------------------------------------
// Offline runs against a knowledge snapshot
// ---------------------------------------------------------------------------

#[test]
fn offline_run_classifies_every_vulnerable_dependency() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.push("--json");
    let doc = json_of(&args);

    assert_eq!(doc["analysis_info"]["status"], "success");
    let ws = &doc["workspaces"]["."];

    let express = &ws["patches"]["express@4.17.1"];
    assert_eq!(express["classification"], "FULL");
    assert_eq!(express["recommended_version"], "4.18.2");
    assert_eq!(express["top_level_vulnerable"], false);
    assert_eq!(express["patchable"].as_array().unwrap().len(), 1);
    assert_eq!(
        express["patchable"][0]["vulnerability"]["vulnerability_id"],
        "CVE-2022-24999"
    );

    let lodash = &ws["patches"]["lodash@4.17.20"];
    assert_eq!(lodash["classification"], "FULL");
    assert_eq!(lodash["recommended_version"], "4.17.21");
    assert_eq!(lodash["top_level_vulnerable"], true);

    assert!(ws["patches"].get("chalk@4.1.2").is_none(), "clean dependencies are not listed");

    let minimist = &ws["dev_patches"]["minimist@1.2.0"];
    assert_eq!(minimist["classification"], "NONE");
    assert!(minimist.get("recommended_version").is_none());
    assert_eq!(minimist["unpatchable"].as_array().unwrap().len(), 1);
}

#[test]
fn newest_preference_skips_prereleases() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.extend(["--json", "--prefer", "newest"]);
    let doc = json_of(&args);

    assert_eq!(
        doc["workspaces"]["."]["patches"]["express@4.17.1"]["recommended_version"],
        "4.18.2"
    );
}

#[test]
fn text_output_lists_recommendations() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let stdout = stdout_of(&offline_args(&sbom, &vulns, &knowledge));

    assert!(stdout.starts_with("status: success"), "got: {stdout}");
    assert!(stdout.contains("  dependencies:"));
    assert!(stdout.contains("    express@4.17.1: FULL -> 4.18.2"));
    assert!(stdout.contains("    lodash@4.17.20: FULL -> 4.17.21"));
    assert!(stdout.contains("  dev dependencies:"));
    assert!(stdout.contains("    minimist@1.2.0: NONE"));
    assert!(!stdout.contains("chalk"));
}

#[test]
fn output_flag_writes_file() {
    let dir = std::env::temp_dir().join(format!("patchwise-output-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let target = dir.join("patches.json");
    let target_str = target.to_str().unwrap();

    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.extend(["--json", "--output", target_str]);
    let stdout = stdout_of(&args);
    assert!(stdout.is_empty(), "results should go to the file, got: {stdout}");

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(written["analysis_info"]["status"], "success");

    std::fs::remove_dir_all(&dir).ok();
}

// ---------------------------------------------------------------------------
// Failure documents and errors
// ---------------------------------------------------------------------------

#[test]
fn upstream_failure_exits_2_with_failure_document() {
    let (sbom, vulns, knowledge) = (fixture("failed-sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.push("--json");
    let output = run_patchwise(&args);

    assert_eq!(output.status.code(), Some(2));
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["analysis_info"]["status"], "failure");
    assert_eq!(doc["analysis_info"]["public_errors"][0]["kind"], "PREVIOUS_STAGE_FAILED");
    assert!(doc["workspaces"].as_object().unwrap().is_empty());
}

#[test]
fn unrecognised_upstream_status_is_a_failure_document() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("started-vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.push("--json");
    let output = run_patchwise(&args);

    assert_eq!(
        output.status.code(),
        Some(2),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["analysis_info"]["status"], "failure");
    assert_eq!(doc["analysis_info"]["public_errors"][0]["kind"], "PREVIOUS_STAGE_FAILED");
}

#[test]
fn upstream_failure_never_connects_to_database() {
    let (sbom, vulns) = (fixture("failed-sbom.json"), fixture("vulns.json"));
    let output = run_patchwise(&[
        "--sbom",
        &sbom,
        "--vulns",
        &vulns,
        "--database-url",
        "postgres://nobody@127.0.0.1:1/knowledge",
        "--json",
    ]);

    assert_eq!(output.status.code(), Some(2));
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["analysis_info"]["status"], "failure");
}

#[test]
fn missing_document_exits_1() {
    let (vulns, knowledge) = (fixture("vulns.json"), fixture("knowledge.json"));
    let output = run_patchwise(&offline_args("/nonexistent/sbom.json", &vulns, &knowledge));

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read /nonexistent/sbom.json"), "got: {stderr}");
}

#[test]
fn missing_knowledge_source_exits_1() {
    let (sbom, vulns) = (fixture("sbom.json"), fixture("vulns.json"));
    let output = run_patchwise(&["--sbom", &sbom, "--vulns", &vulns]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("knowledge source is required"), "got: {stderr}");
}

#[test]
fn unknown_registry_is_rejected() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.extend(["--registry", "pypi"]);
    let output = run_patchwise(&args);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown registry"), "got: {stderr}");
}

#[test]
fn invalid_preference_is_rejected() {
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("knowledge.json"));
    let mut args = offline_args(&sbom, &vulns, &knowledge);
    args.extend(["--prefer", "latest"]);
    let output = run_patchwise(&args);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn no_args_fails() {
    let output = run_patchwise(&[]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn version_flag_succeeds() {
    let stdout = stdout_of(&["--version"]);
    assert!(stdout.starts_with("patchwise "), "got: {stdout}");
}

// ---------------------------------------------------------------------------
// npm registry backend
// ---------------------------------------------------------------------------

async fn setup_npm_registry() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/express"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "express",
            "versions": {
                "4.17.1": {"dependencies": {"qs": "6.7.0"}},
                "4.18.2": {"dependencies": {"qs": "^6.11.0"}}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/qs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "qs",
            "versions": {"6.7.0": {}, "6.11.0": {}}
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn npm_registry_supplies_versions_and_manifests() {
    let server = setup_npm_registry().await;
    let (sbom, vulns, knowledge) = (fixture("sbom.json"), fixture("vulns.json"), fixture("nvd-only.json"));

    let output = patchwise()
        .args(offline_args(&sbom, &vulns, &knowledge))
        .args(["--registry", "npm", "--json"])
        .env("PATCHWISE_NPM_REGISTRY_URL", server.uri())
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    let express = &doc["workspaces"]["."]["patches"]["express@4.17.1"];
    assert_eq!(express["classification"], "FULL");
    assert_eq!(express["recommended_version"], "4.18.2");
}
