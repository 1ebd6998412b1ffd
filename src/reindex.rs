//! Rebuilds the knowledge index by running the configured index command, or
//! clears it with [`reset_index`].
//!
//! The command and its arguments come from `[reindex]`; `{root}` in any
//! argument is replaced with `index.root`. Output is captured, and a
//! non-zero exit is reported with the command's stderr.

use anyhow::Context;
use serde::Serialize;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::RetrievalError;

/// JSON body of a successful reindex, also printed by `kc reindex`.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    /// Always `"success"`; failures are returned as errors.
    pub status: &'static str,
    /// Human-readable summary.
    pub message: String,
    pub elapsed_secs: f64,
}

/// Expands `{root}` placeholders in the configured arguments.
pub fn build_args(config: &Config) -> Vec<String> {
    let root = config.index.root.display().to_string();
    config
        .reindex
        .args
        .iter()
        .map(|arg| arg.replace("{root}", &root))
        .collect()
}

/// Runs the configured index command and waits for it to finish.
///
/// The child is killed if it outlives `reindex.timeout_secs`.
///
/// # Errors
///
/// - [`RetrievalError::BackendSpawn`] if the command cannot be started.
/// - [`RetrievalError::BackendExit`] on a non-zero exit, carrying its stderr.
/// - [`RetrievalError::Timeout`] when the timeout elapses.
pub async fn run_reindex(config: &Config) -> Result<ReindexReport, RetrievalError> {
    let command = config.reindex.command.clone();
    let args = build_args(config);
    let started = std::time::Instant::now();
    tracing::info!(%command, ?args, "reindex started");

    let child = Command::new(&command)
        .args(&args)
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(Duration::from_secs(config.reindex.timeout_secs), child)
        .await
    {
        Ok(result) => result.map_err(|source| RetrievalError::BackendSpawn {
            command: command.clone(),
            source,
        })?,
        Err(_) => {
            return Err(RetrievalError::Timeout {
                stage: "reindex",
                secs: config.reindex.timeout_secs,
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(%command, code = ?output.status.code(), "reindex failed");
        return Err(RetrievalError::BackendExit {
            command,
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(elapsed_secs = elapsed, "reindex complete");
    Ok(ReindexReport {
        status: "success",
        message: format!(
            "Re-indexing completed in {:.1}s. Index written under {}.",
            elapsed,
            config.index.output_dir().display()
        ),
        elapsed_secs: elapsed,
    })
}

/// JSON body of a successful reset.
#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub status: &'static str,
    pub message: String,
}

/// Deletes the index output directory (`index.output_dir()`), including any
/// timestamped run folders under it. Afterwards queries report a missing
/// index until the next reindex. Nothing outside that directory is touched.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub async fn reset_index(config: &Config) -> anyhow::Result<ResetReport> {
    let dir = config.index.output_dir();
    let message = if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to remove index output: {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "index output removed");
        format!("Index output cleared: {}", dir.display())
    } else {
        format!("Nothing to clear: {} does not exist", dir.display())
    };
    Ok(ResetReport {
        status: "success",
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(command: &str, args: &[&str]) -> Config {
        let mut c = Config::default();
        c.index.root = PathBuf::from("/data/proj");
        c.reindex.command = command.to_string();
        c.reindex.args = args.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn test_root_placeholder_expanded() {
        let c = config("graphrag", &["index", "--root", "{root}"]);
        assert_eq!(build_args(&c), vec!["index", "--root", "/data/proj"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_report() {
        let report = run_reindex(&config("true", &[])).await.unwrap();
        assert_eq!(report.status, "success");
        assert!(report.message.starts_with("Re-indexing completed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_carries_exit_status() {
        let err = run_reindex(&config("false", &[])).await.unwrap_err();
        assert!(matches!(err, RetrievalError::BackendExit { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_reset_removes_output_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("output").join("20250301-101500");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("entities.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("settings.yaml"), "x").unwrap();

        let mut c = Config::default();
        c.index.root = tmp.path().to_path_buf();
        let report = reset_index(&c).await.unwrap();
        assert_eq!(report.status, "success");
        assert!(report.message.starts_with("Index output cleared"));
        assert!(!tmp.path().join("output").exists());
        assert!(tmp.path().join("settings.yaml").exists());

        let again = reset_index(&c).await.unwrap();
        assert!(again.message.starts_with("Nothing to clear"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let err = run_reindex(&config("kc-test-no-such-indexer", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::BackendSpawn { .. }));
    }
}
