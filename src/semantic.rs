//! Semantic search adapter.
//!
//! The search backend sits behind [`SemanticBackend`], a narrow
//! `(strategy, query) → text-or-error` interface, so it can be swapped or
//! mocked without touching orchestration. [`CliSemanticBackend`] shells out
//! to the index tool:
//!
//! ```text
//! <command> query --root <root> --method <local|global|community> --query <text>
//! ```
//!
//! [`SemanticSearchAdapter`] wraps a backend with the request timeout and
//! turns every outcome into exactly one [`EvidenceItem`].

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::RetrievalError;
use crate::models::{EvidenceItem, EvidenceKind, EvidenceSource, SearchStrategy};

/// Runs a semantic search over the index with the given strategy.
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Returns the raw result text.
    ///
    /// # Errors
    ///
    /// Any [`RetrievalError`]; [`SemanticSearchAdapter`] turns it into an
    /// evidence entry.
    async fn search(&self, strategy: SearchStrategy, query: &str)
        -> Result<String, RetrievalError>;
}

/// Runs the external search command as a child process.
pub struct CliSemanticBackend {
    command: String,
    root: PathBuf,
    credential_env: Vec<String>,
    strip_log_lines: bool,
}

impl CliSemanticBackend {
    /// Reads `[semantic]` and `index.root`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.semantic.command.clone(),
            root: config.index.root.clone(),
            credential_env: config.semantic.credential_env.clone(),
            strip_log_lines: config.semantic.strip_log_lines,
        }
    }

    fn check_credentials(&self) -> Result<(), RetrievalError> {
        if self.credential_env.is_empty() {
            return Ok(());
        }
        let present = self
            .credential_env
            .iter()
            .any(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()));
        if present {
            Ok(())
        } else {
            Err(RetrievalError::MissingCredential {
                vars: self.credential_env.clone(),
            })
        }
    }
}

#[async_trait]
impl SemanticBackend for CliSemanticBackend {
    async fn search(
        &self,
        strategy: SearchStrategy,
        query: &str,
    ) -> Result<String, RetrievalError> {
        self.check_credentials()?;

        let output = Command::new(&self.command)
            .arg("query")
            .arg("--root")
            .arg(&self.root)
            .args(["--method", strategy.as_str(), "--query", query])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RetrievalError::BackendSpawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RetrievalError::BackendExit {
                command: self.command.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(if self.strip_log_lines {
            strip_log_lines(&stdout)
        } else {
            stdout.into_owned()
        })
    }
}

/// Removes lines that start with a `YYYY-MM-DD` timestamp (backend logging).
pub fn strip_log_lines(output: &str) -> String {
    output
        .lines()
        .filter(|line| {
            !line
                .get(..10)
                .is_some_and(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").is_ok())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wraps a [`SemanticBackend`] with a timeout and converts every result
/// into exactly one semantic [`EvidenceItem`].
pub struct SemanticSearchAdapter {
    backend: Arc<dyn SemanticBackend>,
    timeout: Duration,
}

impl SemanticSearchAdapter {
    pub fn new(backend: Arc<dyn SemanticBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Runs one search. Failures come back as an `Error` item, never a panic
    /// or an `Err`.
    pub async fn run(&self, strategy: SearchStrategy, query: &str) -> EvidenceItem {
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.backend.search(strategy, query))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout {
                stage: "semantic search",
                secs: self.timeout.as_secs(),
            }),
        };

        match result {
            Ok(text) if text.trim().is_empty() => {
                tracing::info!(%strategy, "semantic search returned nothing");
                EvidenceItem::new(
                    EvidenceSource::Semantic,
                    EvidenceKind::NoMatch,
                    format!("Semantic {} search returned no results.", strategy),
                )
            }
            Ok(text) => {
                tracing::info!(
                    %strategy,
                    chars = text.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "semantic search complete"
                );
                EvidenceItem::new(EvidenceSource::Semantic, EvidenceKind::Match, text)
            }
            Err(e) => {
                tracing::warn!(%strategy, error = %e, "semantic search failed");
                EvidenceItem::new(
                    EvidenceSource::Semantic,
                    EvidenceKind::Error,
                    format!("Semantic search error: {}", e),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait]
    impl SemanticBackend for Fixed {
        async fn search(
            &self,
            _strategy: SearchStrategy,
            _query: &str,
        ) -> Result<String, RetrievalError> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(RetrievalError::BackendExit {
                    command: "graphrag".into(),
                    code: 2,
                    stderr: "boom".into(),
                }),
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl SemanticBackend for Slow {
        async fn search(
            &self,
            _strategy: SearchStrategy,
            _query: &str,
        ) -> Result<String, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn adapter(backend: impl SemanticBackend + 'static) -> SemanticSearchAdapter {
        SemanticSearchAdapter::new(Arc::new(backend), Duration::from_millis(200))
    }

    #[test]
    fn test_strip_log_lines() {
        let raw = "2025-03-01 10:00:00 INFO loading\nSUCCESS: Local Search Response:\nThe answer.\n2025-03-01 10:00:01 done";
        assert_eq!(
            strip_log_lines(raw),
            "SUCCESS: Local Search Response:\nThe answer."
        );
    }

    #[test]
    fn test_strip_log_lines_keeps_non_dates() {
        assert_eq!(strip_log_lines("2025 was a year\nabc"), "2025 was a year\nabc");
    }

    #[tokio::test]
    async fn test_success_is_match() {
        let item = adapter(Fixed(Ok("the graph says hi"))).run(SearchStrategy::Global, "q").await;
        assert_eq!(item.kind, EvidenceKind::Match);
        assert_eq!(item.source, EvidenceSource::Semantic);
        assert_eq!(item.text, "the graph says hi");
    }

    #[tokio::test]
    async fn test_empty_output_is_no_match() {
        let item = adapter(Fixed(Ok("  \n"))).run(SearchStrategy::Local, "q").await;
        assert_eq!(item.kind, EvidenceKind::NoMatch);
    }

    #[tokio::test]
    async fn test_backend_exit_is_error_item() {
        let item = adapter(Fixed(Err(()))).run(SearchStrategy::Local, "q").await;
        assert_eq!(item.kind, EvidenceKind::Error);
        assert!(item.text.contains("boom"));
        assert!(item.text.contains("status 2"));
    }

    #[tokio::test]
    async fn test_timeout_is_error_item() {
        let item = adapter(Slow).run(SearchStrategy::Local, "q").await;
        assert_eq!(item.kind, EvidenceKind::Error);
        assert!(item.text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cli_missing_credentials() {
        let mut cfg = Config::default();
        cfg.semantic.credential_env = vec!["KC_TEST_CREDENTIAL_NEVER_SET".to_string()];
        let err = CliSemanticBackend::from_config(&cfg)
            .search(SearchStrategy::Local, "q")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_cli_missing_binary_is_spawn_error() {
        let mut cfg = Config::default();
        cfg.semantic.credential_env.clear();
        cfg.semantic.command = "kc-test-no-such-binary".to_string();
        let err = CliSemanticBackend::from_config(&cfg)
            .search(SearchStrategy::Local, "q")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::BackendSpawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_passes_strategy_and_query() {
        let mut cfg = Config::default();
        cfg.semantic.credential_env.clear();
        cfg.semantic.command = "echo".to_string();
        cfg.index.root = PathBuf::from("ragtest");
        let out = CliSemanticBackend::from_config(&cfg)
            .search(SearchStrategy::Community, "what is this")
            .await
            .unwrap();
        assert_eq!(
            out.trim(),
            "query --root ragtest --method community --query what is this"
        );
    }
}
