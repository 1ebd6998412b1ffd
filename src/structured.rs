//! Structured query engine: exact keyword-to-entity lookups.
//!
//! Every returned block is copied out of the evidence tables, so nothing
//! here can invent content. The steps are:
//!
//! 1. Tokenize the query, dropping stop phrases, stop words and tokens of
//!    two characters or fewer.
//! 2. Match each keyword against entity titles, then against descriptions.
//! 3. Deduplicate by entity id, keeping first-seen order.
//! 4. Backfill business entity types for overview queries or thin results.
//! 5. Drop build-tooling noise by title.
//! 6. Attach each entity's text units verbatim.
//!
//! Output is deterministic: the same tables and query always give the same
//! items in the same order.

use std::collections::HashSet;
use std::path::Path;

use crate::config::StructuredConfig;
use crate::models::{Entity, EvidenceItem, EvidenceKind, EvidenceSource};
use crate::store::EvidenceStore;

/// Deterministic keyword lookup over the evidence tables.
///
/// Built once from [`StructuredConfig`]; stop phrases and stop words are
/// normalised at construction.
pub struct StructuredQueryEngine {
    config: StructuredConfig,
    stop_phrases: Vec<Vec<String>>,
    stop_words: HashSet<String>,
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

impl StructuredQueryEngine {
    pub fn new(config: StructuredConfig) -> Self {
        let stop_phrases = config
            .stop_phrases
            .iter()
            .map(|p| words(&p.to_lowercase()))
            .filter(|p| !p.is_empty())
            .collect();
        let stop_words = config.stop_words.iter().map(|w| w.to_lowercase()).collect();
        Self {
            config,
            stop_phrases,
            stop_words,
        }
    }

    /// Candidate keywords for `query`, lowercased and in query order.
    ///
    /// Stop phrases only match on whole words. A token with a file extension
    /// (`slacknotifier.cls`) also contributes its stem.
    pub fn extract_keywords(&self, query: &str) -> Vec<String> {
        let tokens = words(&query.to_lowercase());
        let mut kept = Vec::new();
        let mut i = 0;
        'outer: while i < tokens.len() {
            for phrase in &self.stop_phrases {
                if tokens[i..].starts_with(phrase) {
                    i += phrase.len();
                    continue 'outer;
                }
            }
            kept.push(tokens[i].clone());
            i += 1;
        }

        let mut keywords: Vec<String> = Vec::new();
        let mut push = |kw: &str| {
            if kw.chars().count() > 2
                && !self.stop_words.contains(kw)
                && !keywords.iter().any(|k| k == kw)
            {
                keywords.push(kw.to_string());
            }
        };
        for token in &kept {
            if let Some((stem, _ext)) = token.rsplit_once('.') {
                push(stem);
            }
            push(token);
        }
        keywords
    }

    /// True when the query asks about the project as a whole.
    pub fn is_overview(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        self.config
            .overview_phrases
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }

    /// True when the title names build tooling rather than business logic.
    ///
    /// Titles and patterns are split into uppercase tokens on every
    /// non-alphanumeric character. A pattern matches when its tokens appear
    /// as a contiguous run in the title (`jest.config.js` matches
    /// `JEST_CONFIG`), or when both spell the same characters once separators
    /// are dropped (`packageDirectories` matches `PACKAGE_DIRECTORIES`). A
    /// pattern never matches inside a word, so `PaymentPathResolver` is not
    /// caught by `PATH`.
    pub fn is_noise(&self, title: &str) -> bool {
        let title_tokens = noise_tokens(title);
        let title_compact: String = title_tokens.concat();
        self.config.noise_patterns.iter().any(|pattern| {
            let pattern_tokens = noise_tokens(pattern);
            !pattern_tokens.is_empty()
                && (title_tokens
                    .windows(pattern_tokens.len())
                    .any(|w| w == pattern_tokens.as_slice())
                    || title_compact == pattern_tokens.concat())
        })
    }

    /// Opens the store under `output_dir` and runs [`search`](Self::search).
    ///
    /// A missing or unreadable store becomes a single explicit evidence item.
    pub fn run(&self, query: &str, output_dir: &Path) -> Vec<EvidenceItem> {
        match EvidenceStore::open(output_dir) {
            Ok(store) => self.search(query, &store),
            Err(e) => {
                tracing::warn!(error = %e, "evidence store unavailable");
                let kind = if e.is_store_missing() {
                    EvidenceKind::StoreMissing
                } else {
                    EvidenceKind::Error
                };
                vec![EvidenceItem::new(
                    EvidenceSource::Structured,
                    kind,
                    format!("Error: {}", e),
                )]
            }
        }
    }

    /// Runs the lookup against an already opened store.
    ///
    /// # Returns
    ///
    /// One [`EvidenceKind::Match`] item per surviving entity, titled with the
    /// entity title, in match order. When nothing survives, a single
    /// [`EvidenceKind::NoMatch`] item that names the searched keywords (or
    /// the overview backfill when the query had none). Never empty.
    pub fn search(&self, query: &str, store: &EvidenceStore) -> Vec<EvidenceItem> {
        let keywords = self.extract_keywords(query);
        let overview = self.is_overview(query);
        tracing::debug!(?keywords, overview, "structured lookup");

        if keywords.is_empty() && !overview {
            return vec![EvidenceItem::new(
                EvidenceSource::Structured,
                EvidenceKind::NoMatch,
                "No valid search terms found in query.",
            )];
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut matched: Vec<&Entity> = Vec::new();
        // Title matches for every keyword come before any description match.
        let title_hits = keywords.iter().flat_map(|kw| store.title_matches(kw));
        let desc_hits = keywords.iter().flat_map(|kw| store.description_matches(kw));
        for entity in title_hits.chain(desc_hits) {
            if seen.insert(entity.id.as_str()) {
                matched.push(entity);
            }
        }

        if overview || matched.len() < self.config.min_matches {
            tracing::debug!(
                found = matched.len(),
                "backfilling with business entity types"
            );
            for entity_type in &self.config.business_types {
                for entity in store.entities_of_type(entity_type, self.config.backfill_per_type) {
                    if seen.insert(entity.id.as_str()) {
                        matched.push(entity);
                    }
                }
            }
        }

        let survivors: Vec<&Entity> = matched
            .into_iter()
            .filter(|e| {
                let noise = self.is_noise(&e.title);
                if noise {
                    tracing::debug!(title = %e.title, "filtered configuration entity");
                }
                !noise
            })
            .collect();

        if survivors.is_empty() {
            let text = if keywords.is_empty() {
                format!(
                    "No business entities found for a project overview (types searched: {}).",
                    self.config.business_types.join(", ")
                )
            } else {
                format!(
                    "No business entities found matching: {}",
                    keywords.join(", ")
                )
            };
            return vec![EvidenceItem::new(
                EvidenceSource::Structured,
                EvidenceKind::NoMatch,
                text,
            )];
        }

        survivors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                EvidenceItem::new(
                    EvidenceSource::Structured,
                    EvidenceKind::Match,
                    render_entity(i + 1, e, &store.text_units_for(e)),
                )
                .with_title(e.title.clone())
            })
            .collect()
    }
}

fn noise_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn render_entity(position: usize, entity: &Entity, texts: &[&str]) -> String {
    let mut block = format!("## {}. {}\n\n", position, entity.title);
    if let Some(desc) = entity.description.as_deref().filter(|d| !d.is_empty()) {
        block.push_str(&format!("**Description:** {}\n\n", desc));
    }
    if let Some(ty) = entity.entity_type.as_deref().filter(|t| !t.is_empty()) {
        block.push_str(&format!("**Type:** {}\n\n", ty));
    }
    if !texts.is_empty() {
        block.push_str("**Source Code/Text:**\n\n");
        for text in texts {
            block.push_str(&format!("```\n{}\n```\n\n", text));
        }
    }
    block
}
