//! Strategy selector.
//!
//! Picks the semantic search mode for a query:
//! - a single named function, class or implementation detail → `local`
//! - overall project purpose or features → `community`
//! - architecture or system-wide design → `global`
//!
//! The decision is delegated to the reasoning backend. An unusable answer or
//! a failed call selects `local`, the strictest mode, and is logged as a
//! fallback.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::ChatModel;
use crate::models::{Intent, SearchStrategy};

const SYSTEM_PROMPT: &str = "You select the search method for a source-code knowledge graph.

LOCAL: specific, detailed questions about particular functions, classes, or code.
  e.g. \"How does the login function work?\", \"Give me the code for AccountSlackNotifyJob\"
COMMUNITY: what the project does, its features or capabilities.
  e.g. \"What is the project about?\", \"What are the key features?\"
GLOBAL: architecture, technical design, or system-wide structure.
  e.g. \"What is the technical architecture?\", \"How are components organized?\"

\"What is the project about\" = community. \"What is the architecture\" = global.
\"How does X work\" = local.

Respond with ONLY one word: local, global, or community.";

/// Used whenever the selector cannot produce a valid strategy.
pub const FALLBACK_STRATEGY: SearchStrategy = SearchStrategy::Local;

/// The chosen strategy and whether it came from the fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategySelection {
    pub strategy: SearchStrategy,
    pub fallback: bool,
}

/// Picks the semantic search strategy for an intent and query.
pub struct StrategySelector {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl StrategySelector {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Asks the model for one of `local`, `global` or `community`.
    ///
    /// # Returns
    ///
    /// The chosen strategy, or [`FALLBACK_STRATEGY`] with `fallback: true`
    /// when the call fails, times out or replies with anything else.
    pub async fn select(&self, intent: Intent, query: &str) -> StrategySelection {
        let user = format!(
            "Query: {}\nIntent: {}\n\nWhich search method should be used?",
            query, intent
        );
        let call = self.model.complete(SYSTEM_PROMPT, &user);

        let reason = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => match SearchStrategy::parse(&reply) {
                Some(strategy) => {
                    tracing::info!(%strategy, %intent, "search strategy selected");
                    return StrategySelection {
                        strategy,
                        fallback: false,
                    };
                }
                None => format!("invalid recommendation {:?}", reply.trim()),
            },
            Ok(Err(e)) => format!("selection call failed: {}", e),
            Err(_) => format!("selection timed out after {}s", self.timeout.as_secs()),
        };

        tracing::warn!(
            %reason,
            fallback = %FALLBACK_STRATEGY,
            "using fallback search strategy"
        );
        StrategySelection {
            strategy: FALLBACK_STRATEGY,
            fallback: true,
        }
    }
}
