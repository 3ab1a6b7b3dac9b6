mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::*;

fn run_cli(schema_root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_apikit-validate"))
        .arg("--schema-root")
        .arg(schema_root)
        .arg("--api")
        .arg(api().as_str())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("APIKIT_FAIL_ON_WARNING")
        .env_remove("RAML_JSON_SCHEMA_FAIL_ON_WARNING")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_cli_help_output() {
    let output = Command::new(env!("CARGO_BIN_EXE_apikit-validate"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let help = stdout(&output);
    for flag in [
        "--schema",
        "--content-type",
        "--fail-on-warning",
        "--collect-all",
        "--threads",
        "--config",
    ] {
        assert!(help.contains(flag), "help is missing {}", flag);
    }
}

#[test]
fn test_cli_accepts_valid_payloads() {
    let tree = SchemaTree::new();
    let first = tree.write_payload("a.json", r#"{"id": 1, "item": "pen"}"#);
    let second = tree.write_payload("b.json", r#"{"id": 2, "item": "ink"}"#);

    let output = run_cli(
        tree.root(),
        &[
            "-s",
            "order.json",
            first.to_str().unwrap(),
            second.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
    let text = stdout(&output);
    assert!(text.contains("ACCEPTED"));
    assert!(text.contains("2 payloads: 2 accepted, 0 rejected, 0 failed"));
}

#[test]
fn test_cli_rejected_payload_exits_with_one() {
    let tree = SchemaTree::new();
    let good = tree.write_payload("good.xml", VALID_ORDER_XML);
    let bad = tree.write_payload("bad.xml", INVALID_ORDER_XML);

    let output = run_cli(
        tree.root(),
        &["-s", "order.xsd", good.to_str().unwrap(), bad.to_str().unwrap()],
    );

    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("REJECTED"));
    assert!(text.contains("1 accepted, 1 rejected"));
}

#[test]
fn test_cli_missing_schema_exits_with_two() {
    let tree = SchemaTree::new();
    let payload = tree.write_payload("a.json", "{}");

    let output = run_cli(tree.root(), &["-s", "nope.json", payload.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).contains("ERROR"));
}

#[test]
fn test_cli_fail_on_warning_flag() {
    let tree = SchemaTree::new();
    let payload = tree.write_payload("a.json", r#"{"id": 1, "item": "pen"}"#);
    let payload = payload.to_str().unwrap();

    let lenient = run_cli(tree.root(), &["-s", "order-lenient.json", payload]);
    assert_eq!(lenient.status.code(), Some(0));
    assert!(stdout(&lenient).contains("warning:"));

    let strict = run_cli(
        tree.root(),
        &["-s", "order-lenient.json", "--fail-on-warning", payload],
    );
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn test_cli_explicit_content_type_overrides_extension() {
    let tree = SchemaTree::new();
    let payload = tree.write_payload("order.txt", r#"{"id": 1, "item": "pen"}"#);

    // Without a content type the payload is treated as XML
    let as_xml = run_cli(tree.root(), &["-s", "order.json", payload.to_str().unwrap()]);
    assert!(!as_xml.status.success());

    let as_json = run_cli(
        tree.root(),
        &[
            "-s",
            "order.json",
            "-c",
            "application/json; charset=UTF-8",
            payload.to_str().unwrap(),
        ],
    );
    assert_eq!(as_json.status.code(), Some(0));
}

#[test]
fn test_cli_missing_payload_file() {
    let tree = SchemaTree::new();

    let output = run_cli(tree.root(), &["-s", "order.json", "/nonexistent/payload.json"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Payload file does not exist"));
}

#[test]
fn test_cli_conflicting_options() {
    let tree = SchemaTree::new();
    let payload = tree.write_payload("a.json", "{}");

    let output = run_cli(
        tree.root(),
        &["-s", "order.json", "-v", "-q", payload.to_str().unwrap()],
    );

    assert!(!output.status.success());
}
