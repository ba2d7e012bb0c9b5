//! CLI integration tests

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary inside `dir` so no stray config file is picked up
fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_carbon-guard"))
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command")
}

fn json_stdout(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

const SAMPLES: &str = r#"[
    {"timestamp": 0.0, "system_cpu_percent": 40.0, "memory_used_gb": 4.0},
    {"timestamp": 60.0, "system_cpu_percent": 60.0, "memory_used_gb": 4.0,
     "disk_read_bytes": 1073741824}
]"#;

const INVENTORY: &str = r#"{
    "region": "us-east-1",
    "resources": [
        {"service": "ec2", "id": "i-1", "instance_type": "m5.large", "avg_cpu_percent": 4.0},
        {"service": "ec2", "id": "i-2", "instance_type": "m5.xlarge", "state": "stopped"},
        {"service": "s3", "name": "logs", "size_bytes": 5368709120}
    ]
}"#;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Carbon Guard"), "Should show app name");
    for command in ["audit", "plan", "progress", "optimize", "factors", "config"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["--version"]);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(String::from_utf8_lossy(&output.stdout).contains("carbon-guard"));
}

#[test]
fn test_audit_local_reference_session() {
    let dir = TempDir::new().unwrap();
    let samples = write(&dir, "run.json", SAMPLES);

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "local", "--samples", &samples, "--duration", "60"],
    ));
    let result = &json["result"];
    assert_eq!(json["label"], "run");
    assert!((result["power_breakdown"]["total_watts"].as_f64().unwrap() - 46.5).abs() < 1e-9);
    assert!((result["total_energy_kwh"].as_f64().unwrap() - 0.000775).abs() < 1e-12);
    assert_eq!(result["samples_analyzed"], 2);
}

#[test]
fn test_audit_local_rejects_bad_sample() {
    let dir = TempDir::new().unwrap();
    let samples = write(
        &dir,
        "bad.json",
        r#"[{"timestamp": 0.0, "system_cpu_percent": 140.0, "memory_used_gb": 1.0}]"#,
    );

    let output = run(dir.path(), &["audit", "local", "--samples", &samples]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("system_cpu_percent"), "stderr: {stderr}");
}

#[test]
fn test_audit_local_compares_sessions() {
    let dir = TempDir::new().unwrap();
    let first = write(&dir, "first.json", SAMPLES);
    let second = write(
        &dir,
        "second.json",
        r#"{"label": "quiet", "duration_seconds": 30.0,
            "samples": [{"timestamp": 0.0, "system_cpu_percent": 5.0, "memory_used_gb": 1.0}]}"#,
    );

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "local", "--samples", &first, &second],
    ));
    assert_eq!(json["total_sessions"], 2);
    assert_eq!(json["successful_audits"], 2);
    assert_eq!(json["sessions"][1]["label"], "quiet");
}

#[test]
fn test_aws_audit_then_plan() {
    let dir = TempDir::new().unwrap();
    let inventory = write(&dir, "inventory.json", INVENTORY);
    let report_path = dir.path().join("aws_report.json");
    let report = report_path.display().to_string();

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "aws", "--inventory", &inventory, "--save", &report],
    ));
    assert_eq!(json["inactive_resources"], 1);
    assert_eq!(json["resources"][0]["idle"], true);
    assert!(report_path.exists());

    let audit_arg = format!("aws={report}");
    let plan = json_stdout(&run(
        dir.path(),
        &["--format", "json", "plan", "--audit", &audit_arg, "--target", "100"],
    ));
    let ids: Vec<&str> = plan["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"rightsize-instances"));
    assert!(ids.contains(&"s3-storage-classes"));
    assert_eq!(plan["focus"], "all");
}

#[test]
fn test_aws_audits_several_inventories() {
    let dir = TempDir::new().unwrap();
    let east = write(&dir, "east.json", INVENTORY);
    let west = write(
        &dir,
        "west.json",
        r#"{"region": "us-west-2", "resources": [{"service": "lambda", "name": "fn", "memory_mb": 1024}]}"#,
    );

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "aws", "--inventory", &east, &west],
    ));
    let reports = json.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["region"], "us-east-1");
    assert_eq!(reports[1]["region"], "us-west-2");
}

#[test]
fn test_plan_from_multi_region_save() {
    let dir = TempDir::new().unwrap();
    let east = write(&dir, "east.json", INVENTORY);
    let west = write(
        &dir,
        "west.json",
        r#"{"region": "us-west-2", "resources": [{"service": "lambda", "name": "fn", "memory_mb": 1024}]}"#,
    );
    let saved = dir.path().join("regions.json").display().to_string();

    let output = run(
        dir.path(),
        &["--format", "json", "audit", "aws", "--inventory", &east, &west, "--save", &saved],
    );
    assert!(output.status.success());

    let audit_arg = format!("aws={saved}");
    let plan = json_stdout(&run(
        dir.path(),
        &["--format", "json", "plan", "--audit", &audit_arg, "--target", "100"],
    ));
    let has = |id: &str| plan["actions"].as_array().unwrap().iter().any(|a| a["id"] == id);
    assert!(has("rightsize-instances"));
    assert!(plan["baseline"]["infrastructure_co2_kg_per_hour"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_audit_personal_with_filter() {
    let dir = TempDir::new().unwrap();
    let items = write(
        &dir,
        "receipt.json",
        r#"{"items": [
            {"name": "Beef steak", "quantity": 1, "price": 12.0},
            {"name": "Diesel", "price": 40.0},
            {"name": "Gift card", "price": 20.0}
        ]}"#,
    );

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "personal", "--items", &items, "--category", "food"],
    ));
    assert_eq!(json["filter"], "food");
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["filtered_out"], 1);
    assert_eq!(json["unmatched_items"][0], "Gift card");
}

#[test]
fn test_personal_rejects_unknown_filter() {
    let dir = TempDir::new().unwrap();
    let items = write(&dir, "receipt.json", "[]");

    let output = run(dir.path(), &["audit", "personal", "--items", &items, "--category", "toys"]);
    assert!(!output.status.success());
}

const DOCKERFILE: &str = "FROM python:3.11
RUN apt-get update
RUN apt-get install -y gcc
COPY . /app
";

#[test]
fn test_optimize_writes_optimized_dockerfile() {
    let dir = TempDir::new().unwrap();
    let dockerfile = write(&dir, "Dockerfile", DOCKERFILE);

    let json = json_stdout(&run(dir.path(), &["--format", "json", "optimize", &dockerfile]));
    assert_eq!(json["strategy"], "all");
    assert_eq!(json["optimizations"][0]["kind"], "multi_stage");
    assert_eq!(json["estimated_reduction_percent"], 80.0);

    let written = dir.path().join("Dockerfile.optimized");
    assert_eq!(json["written_to"], written.display().to_string());
    let optimized = std::fs::read_to_string(written).unwrap();
    assert!(optimized.starts_with("FROM python:3.11-slim\n"));
    assert!(optimized.contains("rm -rf /var/lib/apt/lists/*"));
}

#[test]
fn test_optimize_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let dockerfile = write(&dir, "Dockerfile", DOCKERFILE);

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "optimize", &dockerfile, "--strategy", "layers", "--dry-run"],
    ));
    assert!(json["optimizations"].as_array().unwrap().is_empty());
    assert!(json.get("written_to").is_none());
    assert!(!dir.path().join("Dockerfile.optimized").exists());

    let output = run(dir.path(), &["optimize", &dockerfile, "--strategy", "speed"]);
    assert!(!output.status.success());
}

#[test]
fn test_factor_lookup_reports_fallback() {
    let dir = TempDir::new().unwrap();

    let exact = json_stdout(&run(
        dir.path(),
        &["--format", "json", "factors", "lookup", "instance_power", "m5.large"],
    ));
    assert_eq!(exact["value"], 80.0);
    assert_eq!(exact["source"], "exact");

    let nearest = json_stdout(&run(
        dir.path(),
        &["--format", "json", "factors", "lookup", "instance_power", "m5.4xlarge"],
    ));
    assert_eq!(nearest["source"], "nearest_tier");
}

#[test]
fn test_config_file_changes_results() {
    let dir = TempDir::new().unwrap();
    let samples = write(&dir, "run.json", SAMPLES);
    write(&dir, "carbon-guard.toml", "[device]\ncpu_tdp_watts = 130.0\n");

    let json = json_stdout(&run(
        dir.path(),
        &["--format", "json", "audit", "local", "--samples", &samples, "--duration", "60"],
    ));
    // 50% of 130 W
    assert!((json["result"]["power_breakdown"]["cpu_watts"].as_f64().unwrap() - 65.0).abs() < 1e-9);
}

#[test]
fn test_config_init_writes_sample() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["config", "init"]);

    assert!(output.status.success());
    assert!(dir.path().join("carbon-guard.yaml").exists());
    assert!(!run(dir.path(), &["config", "init"]).status.success());
}

#[test]
fn test_metrics_file_is_written() {
    let dir = TempDir::new().unwrap();
    let samples = write(&dir, "run.json", SAMPLES);
    let metrics = dir.path().join("metrics.prom");

    let output = run(
        dir.path(),
        &[
            "--metrics-file",
            &metrics.display().to_string(),
            "--format",
            "json",
            "audit",
            "local",
            "--samples",
            &samples,
        ],
    );
    assert!(output.status.success());
    let text = std::fs::read_to_string(metrics).unwrap();
    assert!(text.contains("carbon_guard_audits_total{category=\"local_process\"} 1"));
}
