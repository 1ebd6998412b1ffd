//! Pipeline orchestrator.
//!
//! ```text
//! START → IntentAnalysis → RetrievalFanout → Merge → FinalAnswer → END
//!                               │
//!                 ┌─────────────┴──────────────┐
//!                 ▼                            ▼
//!        structured lookup           strategy select → semantic search
//! ```
//!
//! The two retrieval branches run concurrently and are joined before their
//! updates are applied, always structured first, so the result is the same
//! as a sequential run. Each request gets a fresh [`PipelineState`].
//!
//! No retrieval failure escapes [`Pipeline::run`]; the only error it returns
//! is a [`StateError`], which indicates a defect in the merge-rule table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::IntentClassifier;
use crate::config::{Config, SynthesisMode};
use crate::llm::{create_chat_model, ChatModel};
use crate::models::{EvidenceItem, EvidenceKind, EvidenceSource, Intent, SearchStrategy};
use crate::risk;
use crate::semantic::{CliSemanticBackend, SemanticBackend, SemanticSearchAdapter};
use crate::state::{PipelineState, StateError, StateUpdate};
use crate::strategy::{StrategySelection, StrategySelector};
use crate::structured::StructuredQueryEngine;
use crate::synthesis::{Synthesizer, NO_DATA_ANSWER};

/// A state of the orchestrator, recorded in [`QueryOutcome::stages`] as it
/// is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    IntentAnalysis,
    RetrievalFanout,
    Merge,
    FinalAnswer,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a request returns: the answer plus the evidence it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// Unique per request; also recorded on the request's tracing span.
    pub request_id: Uuid,
    pub query: String,
    pub intent: Intent,
    /// Strategy the semantic branch ran with.
    pub strategy: SearchStrategy,
    /// `true` when the selector failed and [`FALLBACK_STRATEGY`] was used.
    ///
    /// [`FALLBACK_STRATEGY`]: crate::strategy::FALLBACK_STRATEGY
    pub strategy_fallback: bool,
    /// Final answer text. Never empty.
    pub answer: String,
    /// Merged evidence: structured items, then semantic, each under a header.
    pub evidence: Vec<EvidenceItem>,
    /// Present only when `pipeline.risk_signals` is enabled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk_signals: Vec<EvidenceItem>,
    /// Orchestrator states in the order they were entered.
    pub stages: Vec<Stage>,
    pub generated_at: DateTime<Utc>,
}

/// The query orchestrator.
///
/// Holds every stage, built once from a [`Config`]. It is `Send + Sync` and
/// shared across requests behind an `Arc`; per-request data lives only in
/// the [`PipelineState`] created by [`run`](Self::run).
pub struct Pipeline {
    classifier: IntentClassifier,
    selector: StrategySelector,
    structured: Arc<StructuredQueryEngine>,
    semantic: SemanticSearchAdapter,
    synthesizer: Synthesizer,
    output_dir: PathBuf,
    risk_signals: bool,
}

impl Pipeline {
    /// Production wiring: OpenAI-compatible models per role and the CLI
    /// search backend.
    ///
    /// Never fails. A disabled provider or a missing API key yields models
    /// that always error, so classification and routing run on their
    /// fallbacks.
    pub fn from_config(config: &Config) -> Self {
        let models = &config.models;
        let timeout = models.call_budget();
        let synthesizer = match config.synthesis.mode {
            SynthesisMode::Passthrough => Synthesizer::Passthrough,
            SynthesisMode::Llm => Synthesizer::Llm {
                model: create_chat_model(models, &models.synthesis_model),
                timeout,
            },
        };
        Self::assemble(
            config,
            IntentClassifier::new(create_chat_model(models, &models.classifier_model), timeout),
            StrategySelector::new(create_chat_model(models, &models.selector_model), timeout),
            Arc::new(CliSemanticBackend::from_config(config)),
            synthesizer,
        )
    }

    /// Wiring with caller-supplied backends; one reasoning model serves
    /// every role.
    ///
    /// # Arguments
    ///
    /// - `config` supplies lookup rules, timeouts, index location and
    ///   synthesis mode. Its `[models]` section is used only for timeouts.
    /// - `reasoning` answers the classifier, selector and (in `llm` mode)
    ///   synthesis prompts.
    /// - `semantic` serves the semantic branch.
    pub fn with_backends(
        config: &Config,
        reasoning: Arc<dyn ChatModel>,
        semantic: Arc<dyn SemanticBackend>,
    ) -> Self {
        let timeout = config.models.call_budget();
        let synthesizer = match config.synthesis.mode {
            SynthesisMode::Passthrough => Synthesizer::Passthrough,
            SynthesisMode::Llm => Synthesizer::Llm {
                model: reasoning.clone(),
                timeout,
            },
        };
        Self::assemble(
            config,
            IntentClassifier::new(reasoning.clone(), timeout),
            StrategySelector::new(reasoning, timeout),
            semantic,
            synthesizer,
        )
    }

    fn assemble(
        config: &Config,
        classifier: IntentClassifier,
        selector: StrategySelector,
        semantic: Arc<dyn SemanticBackend>,
        synthesizer: Synthesizer,
    ) -> Self {
        Self {
            classifier,
            selector,
            structured: Arc::new(StructuredQueryEngine::new(config.structured.clone())),
            semantic: SemanticSearchAdapter::new(
                semantic,
                Duration::from_secs(config.semantic.timeout_secs),
            ),
            synthesizer,
            output_dir: config.index.output_dir(),
            risk_signals: config.pipeline.risk_signals,
        }
    }

    /// Answers one query.
    ///
    /// Runs every stage against a fresh [`PipelineState`] under a `query`
    /// tracing span. Retrieval and model failures show up as evidence
    /// entries or fallback labels, never as errors.
    ///
    /// # Returns
    ///
    /// The final answer with the intent, the strategy and the merged
    /// evidence it was built from.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] only if an update conflicts with its field's
    /// merge rule, which indicates a defect in
    /// [`MERGE_RULES`](crate::state::MERGE_RULES) rather than a bad query.
    pub async fn run(&self, query: &str) -> Result<QueryOutcome, StateError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("query", %request_id);
        self.run_stages(request_id, query).instrument(span).await
    }

    async fn run_stages(&self, request_id: Uuid, query: &str) -> Result<QueryOutcome, StateError> {
        let started = std::time::Instant::now();
        let mut stages = vec![Stage::Start];
        let mut state = PipelineState::new(query);

        stages.push(Stage::IntentAnalysis);
        let intent = self.classifier.classify(query).await;
        state.apply(StateUpdate::Intent(intent))?;
        let intent = state.intent().unwrap_or(Intent::General);

        stages.push(Stage::RetrievalFanout);
        let (structured, (selection, semantic)) =
            tokio::join!(self.structured_branch(query), self.semantic_branch(intent, query));
        state.apply(StateUpdate::Strategy(selection))?;
        state.apply(StateUpdate::Structured(structured))?;
        state.apply(StateUpdate::Semantic(vec![semantic]))?;
        if self.risk_signals {
            state.apply(StateUpdate::Risk(risk::assess(intent, query)))?;
        }

        stages.push(Stage::Merge);
        let merged = merge_evidence(&state, selection.strategy);
        state.apply(StateUpdate::Merged(merged))?;

        stages.push(Stage::FinalAnswer);
        let answer = self.synthesizer.answer(&state).await;
        state.apply(StateUpdate::FinalAnswer(answer))?;
        stages.push(Stage::End);

        tracing::info!(
            %intent,
            strategy = %selection.strategy,
            evidence = state.merged().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );

        Ok(QueryOutcome {
            request_id,
            query: state.query().to_string(),
            intent,
            strategy: selection.strategy,
            strategy_fallback: selection.fallback,
            answer: state.final_answer().unwrap_or(NO_DATA_ANSWER).to_string(),
            evidence: state.merged().to_vec(),
            risk_signals: state.risk_signals().to_vec(),
            stages,
            generated_at: Utc::now(),
        })
    }

    /// Table scans run off the async worker threads.
    async fn structured_branch(&self, query: &str) -> Vec<EvidenceItem> {
        let engine = self.structured.clone();
        let query = query.to_string();
        let dir = self.output_dir.clone();
        match tokio::task::spawn_blocking(move || engine.run(&query, &dir)).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "structured lookup aborted");
                vec![EvidenceItem::new(
                    EvidenceSource::Structured,
                    EvidenceKind::Error,
                    format!("Error: structured lookup aborted: {}", e),
                )]
            }
        }
    }

    /// Strategy selection depends on the intent, so it runs inside this
    /// branch rather than before the fan-out.
    async fn semantic_branch(
        &self,
        intent: Intent,
        query: &str,
    ) -> (StrategySelection, EvidenceItem) {
        let selection = self.selector.select(intent, query).await;
        let item = self.semantic.run(selection.strategy, query).await;
        (selection, item)
    }
}

/// Structured evidence first, then semantic, each under a provenance header.
pub fn merge_evidence(state: &PipelineState, strategy: SearchStrategy) -> Vec<EvidenceItem> {
    let mut merged = Vec::with_capacity(state.structured().len() + state.semantic().len() + 2);
    if !state.structured().is_empty() {
        merged.push(EvidenceItem::new(
            EvidenceSource::Merge,
            EvidenceKind::Header,
            "## Direct Index Matches (Exact Data)\n",
        ));
        merged.extend(state.structured().iter().cloned());
    }
    if !state.semantic().is_empty() {
        merged.push(EvidenceItem::new(
            EvidenceSource::Merge,
            EvidenceKind::Header,
            format!(
                "## Semantic {} Search Results\n",
                strategy.as_str().to_uppercase()
            ),
        ));
        merged.extend(state.semantic().iter().cloned());
    }
    merged
}
