//! TOML configuration.
//!
//! Every section is optional; an empty file yields [`Config::default`]. The
//! orchestrator receives this object at construction instead of reading
//! module-level constants.
//!
//! ```toml
//! [index]
//! root = "./ragtest"
//!
//! [models]
//! provider = "openai"
//! classifier_model = "gpt-4o"
//!
//! [synthesis]
//! mode = "passthrough"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from a TOML file.
///
/// Built once at startup and handed to [`Pipeline`](crate::pipeline::Pipeline),
/// the server and the reindex command. Nothing reads configuration from
/// globals.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Where the knowledge index lives.
    pub index: IndexConfig,
    /// Reasoning backend for classification, routing and synthesis.
    pub models: ModelsConfig,
    /// External semantic search command.
    pub semantic: SemanticConfig,
    /// Keyword lookup rules.
    pub structured: StructuredConfig,
    /// How the final answer is produced.
    pub synthesis: SynthesisConfig,
    /// Optional pipeline stages.
    pub pipeline: PipelineConfig,
    /// Index rebuild command.
    pub reindex: ReindexConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Location of the knowledge index.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Root config path handed to the index/search backend (`--root`).
    pub root: PathBuf,
    /// Directory holding the exported evidence tables. Defaults to `<root>/output`.
    pub output_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./ragtest"),
            output_dir: None,
        }
    }
}

impl IndexConfig {
    /// The configured `output_dir`, or `<root>/output` when unset.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.root.join("output"))
    }
}

/// Reasoning backend used for classification, strategy selection and synthesis.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    /// `openai` (any OpenAI-compatible endpoint) or `disabled`.
    pub provider: String,
    /// Base URL of the chat API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Model that labels the query intent.
    pub classifier_model: String,
    /// Model that picks the semantic search strategy.
    pub selector_model: String,
    /// Model that writes the answer when `synthesis.mode = "llm"`.
    pub synthesis_model: String,
    /// Timeout for a single HTTP attempt, in seconds.
    pub timeout_secs: u64,
    /// Extra attempts after a rate-limit, server or network error.
    pub max_retries: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            classifier_model: "gpt-4o".to_string(),
            selector_model: "gpt-4o-mini".to_string(),
            synthesis_model: "gpt-4o".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl ModelsConfig {
    /// Returns `false` when `provider = "disabled"`.
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Wall-clock budget for one model call including every retry.
    ///
    /// Covers `max_retries + 1` attempts of `timeout_secs` each plus the
    /// exponential backoff between them (1s, 2s, 4s, ... capped at 32s),
    /// so a hung first attempt still leaves room for the retries.
    pub fn call_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff: u64 = (1..=u64::from(self.max_retries))
            .map(|attempt| 1u64 << (attempt - 1).min(5))
            .sum();
        Duration::from_secs(self.timeout_secs * attempts + backoff)
    }
}

/// External semantic search command.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SemanticConfig {
    /// Executable invoked as `<command> query --root ... --method ... --query ...`.
    pub command: String,
    /// At least one of these must be present in the environment. Empty disables the check.
    pub credential_env: Vec<String>,
    /// Timeout for one search, in seconds. The child process is killed on expiry.
    pub timeout_secs: u64,
    /// Drop timestamped log lines the backend prints ahead of its answer.
    pub strip_log_lines: bool,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            command: "graphrag".to_string(),
            credential_env: vec!["GRAPHRAG_API_KEY".to_string(), "OPENAI_API_KEY".to_string()],
            timeout_secs: 180,
            strip_log_lines: true,
        }
    }
}

/// Keyword extraction and filtering rules for exact-match lookups.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StructuredConfig {
    /// Phrases removed from the lowercased query before tokenizing.
    pub stop_phrases: Vec<String>,
    /// Whole tokens never used as keywords.
    pub stop_words: Vec<String>,
    /// Phrases marking a query as a project overview request.
    pub overview_phrases: Vec<String>,
    /// Entity types used to backfill thin or overview results.
    pub business_types: Vec<String>,
    /// How many entities of each business type a backfill adds.
    pub backfill_per_type: usize,
    /// Below this many unique matches the result is backfilled.
    pub min_matches: usize,
    /// Title tokens identifying build-tooling noise. Matched case-insensitively
    /// against whole title tokens, never inside a word.
    pub noise_patterns: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            stop_phrases: strings(&[
                "give me",
                "full code",
                "source code",
                "implementation",
                "show me",
                "what is",
                "how does",
                "explain",
                "why",
            ]),
            stop_words: strings(&[
                "the", "is", "are", "was", "were", "about", "this", "that", "with", "for", "and",
                "or", "but", "not", "can", "will", "from", "has", "have", "had", "does", "did",
                "why", "what", "how", "when", "where", "who", "code",
            ]),
            overview_phrases: strings(&[
                "project",
                "overview",
                "what is this",
                "features",
                "capabilities",
                "functionality",
            ]),
            business_types: strings(&["APEX_CLASS", "SOBJECT", "LWC_COMPONENT"]),
            backfill_per_type: 10,
            min_matches: 3,
            noise_patterns: strings(&[
                "SFDX_PROJECT",
                "DX_PROJECT",
                "SALESFORCE_DX",
                "SOURCEAPIVERSION",
                "PATH",
                "DEFAULT",
                "PACKAGE_DIRECTORIES",
                "NAMESPACE",
                "SFDX",
                "JEST_CONFIG",
                "HUSKY",
                "LINT",
                "ESLINT",
                "ESLINTRC",
                "PRETTIER",
                "PRETTIERRC",
            ]),
        }
    }
}

/// How the final answer is produced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    /// Return the evidence verbatim under a header.
    #[default]
    Passthrough,
    /// Ask the reasoning backend to write the answer from the evidence.
    Llm,
}

/// Final-answer settings.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SynthesisConfig {
    /// `passthrough` (default) or `llm`.
    pub mode: SynthesisMode,
}

/// Optional pipeline stages.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Add deterministic risk signals to every answer.
    pub risk_signals: bool,
}

/// Index build command run by `kc reindex` and `POST /api/reindex`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReindexConfig {
    /// Index build executable.
    pub command: String,
    /// `{root}` is replaced with `index.root`.
    pub args: Vec<String>,
    /// The build is killed after this many seconds.
    pub timeout_secs: u64,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            command: "graphrag".to_string(),
            args: strings(&["index", "--root", "{root}"]),
            timeout_secs: 3600,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address for `kc serve`, e.g. `127.0.0.1:8000`.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Parses and validates configuration from a TOML string.
///
/// # Errors
///
/// Returns an error on malformed TOML or when a value fails validation
/// (unknown provider, zero timeout, empty semantic command).
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reads the file at `path` and parses it with [`parse_config`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails to parse.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    match config.models.provider.as_str() {
        "openai" | "disabled" => {}
        other => bail!(
            "Unknown models.provider: '{}'. Must be openai or disabled.",
            other
        ),
    }

    if config.models.timeout_secs == 0 {
        bail!("models.timeout_secs must be > 0");
    }
    if config.semantic.timeout_secs == 0 {
        bail!("semantic.timeout_secs must be > 0");
    }
    if config.reindex.timeout_secs == 0 {
        bail!("reindex.timeout_secs must be > 0");
    }
    if config.structured.min_matches == 0 {
        bail!("structured.min_matches must be >= 1");
    }
    if config.semantic.command.trim().is_empty() {
        bail!("semantic.command must not be empty");
    }

    Ok(())
}
