//! Core data types shared by every stage of the query pipeline.
//!
//! Index records ([`Entity`], [`TextUnit`], [`Relationship`]) are read-only
//! exports of the upstream index build. [`EvidenceItem`] is what the
//! retrieval stages produce.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Classified purpose of a query. Exactly one is set per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Explain,
    Refactor,
    Debug,
    ImpactAnalysis,
    General,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Explain,
        Intent::Refactor,
        Intent::Debug,
        Intent::ImpactAnalysis,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Explain => "explain",
            Intent::Refactor => "refactor",
            Intent::Debug => "debug",
            Intent::ImpactAnalysis => "impact_analysis",
            Intent::General => "general",
        }
    }

    /// Parses a label, tolerating case, surrounding whitespace, quotes and
    /// trailing punctuation. Anything else is `None`.
    pub fn parse(label: &str) -> Option<Intent> {
        let cleaned = clean_label(label);
        Intent::ALL.into_iter().find(|i| i.as_str() == cleaned)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode of the semantic search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Local,
    Global,
    Community,
}

impl SearchStrategy {
    pub const ALL: [SearchStrategy; 3] = [
        SearchStrategy::Local,
        SearchStrategy::Global,
        SearchStrategy::Community,
    ];

    /// Value passed to the backend's `--method` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Local => "local",
            SearchStrategy::Global => "global",
            SearchStrategy::Community => "community",
        }
    }

    pub fn parse(label: &str) -> Option<SearchStrategy> {
        let cleaned = clean_label(label);
        SearchStrategy::ALL
            .into_iter()
            .find(|s| s.as_str() == cleaned)
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn clean_label(label: &str) -> String {
    label
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c == '*')
        .trim()
        .to_lowercase()
}

/// A node of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub text_unit_ids: Vec<String>,
}

/// A chunk of source text the index was built from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub text: String,
}

/// An edge between two entity titles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// Index exports store `text_unit_ids` either as a list or, for single-unit
/// entities, as a bare string.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
        OneOrMany::Null(()) => Vec::new(),
    })
}

/// Which stage contributed an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Structured,
    Semantic,
    Tool,
    Risk,
    /// Headers inserted by the merge step.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Data taken from the index or returned by a backend.
    Match,
    /// A lookup that found nothing. Not an error.
    NoMatch,
    /// The evidence tables are absent.
    StoreMissing,
    /// A stage failed and degraded to this message.
    Error,
    /// Provenance header added by the merge step.
    Header,
    /// Deterministic risk assessment.
    Signal,
}

/// One unit of retrieved text, attributed to the stage that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub source: EvidenceSource,
    pub kind: EvidenceKind,
    /// Entity title for structured matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
}

impl EvidenceItem {
    pub fn new(source: EvidenceSource, kind: EvidenceKind, text: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            title: None,
            text: text.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, EvidenceKind::Error | EvidenceKind::StoreMissing)
    }
}
