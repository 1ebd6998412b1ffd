//! Final-answer stage.
//!
//! Two modes, chosen by `synthesis.mode`:
//! - **passthrough**: the evidence verbatim under a header. No generative
//!   step, so nothing can be hallucinated.
//! - **llm**: the reasoning backend writes an answer restricted to the
//!   evidence. Falls back to passthrough when the call fails.
//!
//! A missing index always short-circuits to [`INDEX_MISSING_ANSWER`] plus the
//! evidence trace.

use std::sync::Arc;
use std::time::Duration;

use crate::llm::ChatModel;
use crate::models::{EvidenceItem, EvidenceKind};
use crate::state::PipelineState;

/// Answer when no stage produced any evidence.
pub const NO_DATA_ANSWER: &str = "No data found in the indexed files for this query.";

/// Leads every answer given while the evidence tables are absent.
pub const INDEX_MISSING_ANSWER: &str =
    "No indexed data is available yet. Run indexing first (`kc reindex`), then ask again.";

const SYSTEM_PROMPT: &str = "You answer questions about a source-code repository.
Use ONLY the evidence provided. Quote code exactly as given. If the evidence
does not contain the answer, say so plainly instead of guessing. Evidence
entries that report errors mean that source was unavailable.";

/// Final-answer stage, chosen by `synthesis.mode`.
pub enum Synthesizer {
    Passthrough,
    Llm {
        model: Arc<dyn ChatModel>,
        timeout: Duration,
    },
}

fn has_data(items: &[EvidenceItem]) -> bool {
    items.iter().any(|i| i.kind == EvidenceKind::Match)
}

impl Synthesizer {
    /// Writes the final answer from the merged evidence.
    ///
    /// A missing index always yields [`INDEX_MISSING_ANSWER`] first. In `llm`
    /// mode a failed, empty or timed-out model call falls back to the
    /// passthrough rendering, so the result is never empty.
    pub async fn answer(&self, state: &PipelineState) -> String {
        if state
            .structured()
            .iter()
            .any(|i| i.kind == EvidenceKind::StoreMissing)
        {
            return format!("{}\n\n{}", INDEX_MISSING_ANSWER, render_passthrough(state));
        }

        match self {
            Synthesizer::Passthrough => render_passthrough(state),
            Synthesizer::Llm { model, timeout } => {
                if !has_data(state.merged()) {
                    tracing::info!("no evidence to synthesize from, returning trace");
                    return render_passthrough(state);
                }
                let user = synthesis_prompt(state);
                match tokio::time::timeout(*timeout, model.complete(SYSTEM_PROMPT, &user)).await {
                    Ok(Ok(answer)) if !answer.trim().is_empty() => answer,
                    Ok(Ok(_)) => {
                        tracing::warn!("synthesis returned empty text, using passthrough");
                        render_passthrough(state)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "synthesis failed, using passthrough");
                        render_passthrough(state)
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_secs = timeout.as_secs(),
                            "synthesis timed out, using passthrough"
                        );
                        render_passthrough(state)
                    }
                }
            }
        }
    }
}

fn push_section(parts: &mut Vec<String>, heading: &str, items: &[EvidenceItem]) {
    if items.is_empty() {
        return;
    }
    parts.push(format!("\n## {}\n", heading));
    parts.extend(items.iter().map(|i| format!("{}\n", i.text)));
}

/// Renders the accumulated evidence without any generative step.
pub fn render_passthrough(state: &PipelineState) -> String {
    if state.merged().is_empty()
        && state.tool_results().is_empty()
        && state.risk_signals().is_empty()
    {
        return NO_DATA_ANSWER.to_string();
    }

    let mut parts = vec![
        "# Query Results from Indexed Data\n".to_string(),
        format!("**Query:** {}\n", state.query()),
    ];
    if !has_data(state.merged()) {
        parts.push(format!("{}\n", NO_DATA_ANSWER));
    }
    push_section(&mut parts, "Code Analysis Results", state.merged());
    push_section(&mut parts, "Tool Results", state.tool_results());
    push_section(&mut parts, "Risk Signals", state.risk_signals());
    parts.join("\n")
}

fn synthesis_prompt(state: &PipelineState) -> String {
    let mut prompt = format!("Question: {}\n", state.query());
    if let Some(intent) = state.intent() {
        prompt.push_str(&format!("Intent: {}\n", intent));
    }
    prompt.push_str("\nEvidence:\n");
    for item in state
        .merged()
        .iter()
        .chain(state.tool_results())
        .chain(state.risk_signals())
    {
        prompt.push_str(&item.text);
        prompt.push('\n');
    }
    prompt
}
