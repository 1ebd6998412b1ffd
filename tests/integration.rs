use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kc");
    path
}

fn write_index(output: &Path) {
    fs::create_dir_all(output).unwrap();
    fs::write(
        output.join("entities.json"),
        r#"[
  {"id": "e1", "title": "SlackNotifier", "type": "APEX_CLASS",
   "description": "Posts deployment alerts to Slack", "text_unit_ids": ["t1"]},
  {"id": "e2", "title": "OrderHelper", "type": "FUNCTION",
   "description": "Builds order lines", "text_unit_ids": []}
]"#,
    )
    .unwrap();
    fs::write(
        output.join("text_units.json"),
        r#"[{"id": "t1", "text": "public class SlackNotifier { void send() {} }"}]"#,
    )
    .unwrap();
    fs::write(
        output.join("relationships.json"),
        r#"[{"source": "OrderHelper", "target": "SlackNotifier", "weight": 3.0,
             "description": "OrderHelper calls SlackNotifier after checkout"}]"#,
    )
    .unwrap();
}

/// Config with models disabled and `echo` standing in for the search tool.
fn setup_test_env(with_index: bool, reindex_command: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let rag_root = root.join("ragtest");
    fs::create_dir_all(&rag_root).unwrap();
    if with_index {
        write_index(&rag_root.join("output"));
    }

    let config_content = format!(
        r#"[index]
root = "{}"

[models]
provider = "disabled"

[semantic]
command = "echo"
credential_env = []

[reindex]
command = "{}"
args = []

[server]
bind = "127.0.0.1:7338"
"#,
        rag_root.display(),
        reindex_command
    );

    let config_path = config_dir.join("kc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[cfg(unix)]
#[test]
fn test_query_prints_indexed_source() {
    let (_tmp, config) = setup_test_env(true, "true");
    let (stdout, stderr, success) = run_kc(&config, &["query", "give me full code of SlackNotifier"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.starts_with("# Query Results from Indexed Data"));
    assert!(stdout.contains("public class SlackNotifier { void send() {} }"));
    assert!(stdout.contains("## Semantic LOCAL Search Results"));
}

#[cfg(unix)]
#[test]
fn test_query_json_outcome() {
    let (_tmp, config) = setup_test_env(true, "true");
    let (stdout, stderr, success) = run_kc(&config, &["query", "SlackNotifier", "--json"]);
    assert!(success, "query failed: {}", stderr);

    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["intent"], "general");
    assert_eq!(outcome["strategy"], "local");
    assert_eq!(outcome["strategy_fallback"], true);
    let evidence = outcome["evidence"].as_array().unwrap();
    assert_eq!(evidence[0]["source"], "merge");
    assert_eq!(evidence[1]["title"], "SlackNotifier");
    let semantic = evidence.last().unwrap();
    assert_eq!(semantic["source"], "semantic");
    assert!(semantic["text"]
        .as_str()
        .unwrap()
        .contains("--method local --query SlackNotifier"));
}

#[test]
fn test_query_empty_errors() {
    let (_tmp, config) = setup_test_env(true, "true");
    let (_stdout, stderr, success) = run_kc(&config, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_query_without_index_asks_for_reindex() {
    let (_tmp, config) = setup_test_env(false, "true");
    let (stdout, stderr, success) = run_kc(&config, &["query", "what does SlackNotifier do"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.starts_with("No indexed data is available yet."));
    assert!(stdout.contains("entities.json not found"));
}

#[test]
fn test_graph_view() {
    let (_tmp, config) = setup_test_env(true, "true");
    let (stdout, stderr, success) = run_kc(&config, &["graph"]);
    assert!(success, "graph failed: {}", stderr);

    let view: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let nodes = view["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["id"], "SlackNotifier");
    assert_eq!(nodes[0]["type"], "APEX_CLASS");
    let link = &view["links"][0];
    assert_eq!(link["weight"], 3.0);
    assert_eq!(link["label"], "OrderHelper calls SlackNotifie...");
}

#[test]
fn test_graph_without_index_fails() {
    let (_tmp, config) = setup_test_env(false, "true");
    let (_stdout, stderr, success) = run_kc(&config, &["graph"]);
    assert!(!success);
    assert!(stderr.contains("Please run indexing first"));
}

#[cfg(unix)]
#[test]
fn test_reindex_success() {
    let (_tmp, config) = setup_test_env(false, "true");
    let (stdout, stderr, success) = run_kc(&config, &["reindex"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("Re-indexing completed"));
}

#[cfg(unix)]
#[test]
fn test_reindex_failure_reports_status() {
    let (_tmp, config) = setup_test_env(false, "false");
    let (_stdout, stderr, success) = run_kc(&config, &["reindex"]);
    assert!(!success);
    assert!(stderr.contains("exited with status 1"));
}

#[test]
fn test_reset_then_graph_reports_missing_index() {
    let (tmp, config) = setup_test_env(true, "true");
    let (stdout, stderr, success) = run_kc(&config, &["reset"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("Index output cleared"));
    assert!(!tmp.path().join("ragtest/output").exists());
    assert!(tmp.path().join("ragtest").exists());

    let (_stdout, stderr, success) = run_kc(&config, &["graph"]);
    assert!(!success);
    assert!(stderr.contains("Please run indexing first"));
}

#[test]
fn test_invalid_provider_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("kc.toml");
    fs::write(&config, "[models]\nprovider = \"mystery\"\n").unwrap();
    let (_stdout, stderr, success) = run_kc(&config, &["graph"]);
    assert!(!success);
    assert!(stderr.contains("Unknown models.provider"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(kc_binary())
        .current_dir(tmp.path())
        .args(["--config", "no-such-config.toml", "graph"])
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("using built-in defaults"));
    assert!(stderr.contains("ragtest/output"));
}
