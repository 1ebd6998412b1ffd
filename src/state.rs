//! Per-request pipeline state.
//!
//! Stages never assign fields directly. They emit [`StateUpdate`]s and
//! [`PipelineState::apply`] merges each one with the rule declared for its
//! field in [`MERGE_RULES`]. That table is the whole concurrency contract:
//!
//! | Field | Rule |
//! |-------|------|
//! | query, intent, strategy, final answer | first write wins; later writers are ignored |
//! | structured, semantic, tool, risk, merged evidence | append |
//!
//! Appending is order-insensitive for correctness (order only affects
//! presentation), so list-contributing stages may run in any order.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::{EvidenceItem, Intent};
use crate::strategy::StrategySelection;

/// A field of [`PipelineState`], used as the key of [`MERGE_RULES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Query,
    Intent,
    Strategy,
    StructuredEvidence,
    SemanticEvidence,
    ToolResults,
    RiskSignals,
    MergedEvidence,
    FinalAnswer,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::Query => "query",
            StateField::Intent => "intent",
            StateField::Strategy => "strategy",
            StateField::StructuredEvidence => "structured_evidence",
            StateField::SemanticEvidence => "semantic_evidence",
            StateField::ToolResults => "tool_results",
            StateField::RiskSignals => "risk_signals",
            StateField::MergedEvidence => "merged_evidence",
            StateField::FinalAnswer => "final_answer",
        };
        f.write_str(name)
    }
}

/// How a write combines with the value already in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Keep the existing value; ignore late writers.
    FirstWins,
    /// Concatenate in arrival order.
    Append,
    /// Replace the existing value.
    LastWins,
}

/// The merge rule of every [`StateField`], one entry per field.
pub const MERGE_RULES: [(StateField, MergeRule); 9] = [
    (StateField::Query, MergeRule::FirstWins),
    (StateField::Intent, MergeRule::FirstWins),
    (StateField::Strategy, MergeRule::FirstWins),
    (StateField::StructuredEvidence, MergeRule::Append),
    (StateField::SemanticEvidence, MergeRule::Append),
    (StateField::ToolResults, MergeRule::Append),
    (StateField::RiskSignals, MergeRule::Append),
    (StateField::MergedEvidence, MergeRule::Append),
    (StateField::FinalAnswer, MergeRule::FirstWins),
];

/// Looks up the rule for `field` in [`MERGE_RULES`].
pub fn merge_rule(field: StateField) -> MergeRule {
    MERGE_RULES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, rule)| *rule)
        .unwrap_or(MergeRule::FirstWins)
}

/// A contribution from one stage to one field.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    Query(String),
    Intent(Intent),
    Strategy(StrategySelection),
    Structured(Vec<EvidenceItem>),
    Semantic(Vec<EvidenceItem>),
    Tool(Vec<EvidenceItem>),
    Risk(Vec<EvidenceItem>),
    Merged(Vec<EvidenceItem>),
    FinalAnswer(String),
}

impl StateUpdate {
    /// The field this update writes.
    pub fn field(&self) -> StateField {
        match self {
            StateUpdate::Query(_) => StateField::Query,
            StateUpdate::Intent(_) => StateField::Intent,
            StateUpdate::Strategy(_) => StateField::Strategy,
            StateUpdate::Structured(_) => StateField::StructuredEvidence,
            StateUpdate::Semantic(_) => StateField::SemanticEvidence,
            StateUpdate::Tool(_) => StateField::ToolResults,
            StateUpdate::Risk(_) => StateField::RiskSignals,
            StateUpdate::Merged(_) => StateField::MergedEvidence,
            StateUpdate::FinalAnswer(_) => StateField::FinalAnswer,
        }
    }
}

/// Result of applying one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// A first-wins field already had a value.
    Ignored,
}

/// An update whose field and merge rule are incompatible.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("field {field} holds a single value and cannot use the {rule:?} rule")]
    RuleMismatch { field: StateField, rule: MergeRule },
}

fn merge_value<T>(
    field: StateField,
    rule: MergeRule,
    slot: &mut Option<T>,
    value: T,
) -> Result<MergeOutcome, StateError> {
    match rule {
        MergeRule::FirstWins if slot.is_some() => Ok(MergeOutcome::Ignored),
        MergeRule::FirstWins | MergeRule::LastWins => {
            *slot = Some(value);
            Ok(MergeOutcome::Applied)
        }
        MergeRule::Append => Err(StateError::RuleMismatch { field, rule }),
    }
}

fn merge_list<T>(rule: MergeRule, slot: &mut Vec<T>, values: Vec<T>) -> MergeOutcome {
    match rule {
        MergeRule::Append => {
            slot.extend(values);
            MergeOutcome::Applied
        }
        MergeRule::FirstWins if !slot.is_empty() => MergeOutcome::Ignored,
        MergeRule::FirstWins | MergeRule::LastWins => {
            *slot = values;
            MergeOutcome::Applied
        }
    }
}

/// Mutable aggregate threaded through the stages of one request.
///
/// Fields are private; the only way to write is [`apply`](Self::apply), so
/// no stage can bypass its field's merge rule. The state is created per
/// request and dropped once the answer is produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    query: Option<String>,
    intent: Option<Intent>,
    strategy: Option<StrategySelection>,
    structured: Vec<EvidenceItem>,
    semantic: Vec<EvidenceItem>,
    tool_results: Vec<EvidenceItem>,
    risk_signals: Vec<EvidenceItem>,
    merged: Vec<EvidenceItem>,
    final_answer: Option<String>,
}

impl PipelineState {
    /// Fresh state for `query`: every list empty, intent unset.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Merges one update into its field using the field's rule.
    ///
    /// # Returns
    ///
    /// [`MergeOutcome::Ignored`] when a first-wins field was already set,
    /// otherwise [`MergeOutcome::Applied`].
    ///
    /// # Errors
    ///
    /// [`StateError::RuleMismatch`] when a single-valued field is mapped to
    /// [`MergeRule::Append`] in [`MERGE_RULES`].
    pub fn apply(&mut self, update: StateUpdate) -> Result<MergeOutcome, StateError> {
        let field = update.field();
        let rule = merge_rule(field);
        let outcome = match update {
            StateUpdate::Query(v) => merge_value(field, rule, &mut self.query, v)?,
            StateUpdate::Intent(v) => merge_value(field, rule, &mut self.intent, v)?,
            StateUpdate::Strategy(v) => merge_value(field, rule, &mut self.strategy, v)?,
            StateUpdate::FinalAnswer(v) => merge_value(field, rule, &mut self.final_answer, v)?,
            StateUpdate::Structured(v) => merge_list(rule, &mut self.structured, v),
            StateUpdate::Semantic(v) => merge_list(rule, &mut self.semantic, v),
            StateUpdate::Tool(v) => merge_list(rule, &mut self.tool_results, v),
            StateUpdate::Risk(v) => merge_list(rule, &mut self.risk_signals, v),
            StateUpdate::Merged(v) => merge_list(rule, &mut self.merged, v),
        };
        if outcome == MergeOutcome::Ignored {
            tracing::debug!(%field, "late write ignored");
        }
        Ok(outcome)
    }

    /// Applies `updates` in order, stopping at the first error.
    pub fn apply_all(
        &mut self,
        updates: impl IntoIterator<Item = StateUpdate>,
    ) -> Result<(), StateError> {
        for update in updates {
            self.apply(update)?;
        }
        Ok(())
    }

    /// The query the state was created with.
    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    /// `None` until the intent stage has run.
    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn strategy(&self) -> Option<StrategySelection> {
        self.strategy
    }

    pub fn structured(&self) -> &[EvidenceItem] {
        &self.structured
    }

    pub fn semantic(&self) -> &[EvidenceItem] {
        &self.semantic
    }

    pub fn tool_results(&self) -> &[EvidenceItem] {
        &self.tool_results
    }

    pub fn risk_signals(&self) -> &[EvidenceItem] {
        &self.risk_signals
    }

    /// Evidence after the merge stage added provenance headers.
    pub fn merged(&self) -> &[EvidenceItem] {
        &self.merged
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceKind, EvidenceSource, SearchStrategy};
    use std::collections::HashSet;

    fn item(text: &str) -> EvidenceItem {
        EvidenceItem::new(EvidenceSource::Structured, EvidenceKind::Match, text)
    }

    #[test]
    fn test_every_field_has_exactly_one_rule() {
        let fields: HashSet<StateField> = MERGE_RULES.iter().map(|(f, _)| *f).collect();
        assert_eq!(fields.len(), MERGE_RULES.len());
    }

    #[test]
    fn test_new_state_is_empty() {
        let s = PipelineState::new("q");
        assert_eq!(s.query(), "q");
        assert!(s.intent().is_none());
        assert!(s.strategy().is_none());
        assert!(s.structured().is_empty());
        assert!(s.semantic().is_empty());
        assert!(s.tool_results().is_empty());
        assert!(s.risk_signals().is_empty());
        assert!(s.merged().is_empty());
        assert!(s.final_answer().is_none());
    }

    #[test]
    fn test_query_is_write_once() {
        let mut s = PipelineState::new("original");
        assert_eq!(
            s.apply(StateUpdate::Query("other".into())).unwrap(),
            MergeOutcome::Ignored
        );
        assert_eq!(s.query(), "original");
    }

    #[test]
    fn test_intent_first_write_wins() {
        let mut s = PipelineState::new("q");
        assert_eq!(
            s.apply(StateUpdate::Intent(Intent::Debug)).unwrap(),
            MergeOutcome::Applied
        );
        for late in Intent::ALL {
            assert_eq!(
                s.apply(StateUpdate::Intent(late)).unwrap(),
                MergeOutcome::Ignored
            );
        }
        assert_eq!(s.intent(), Some(Intent::Debug));
    }

    #[test]
    fn test_strategy_first_write_wins() {
        let mut s = PipelineState::new("q");
        let first = StrategySelection {
            strategy: SearchStrategy::Global,
            fallback: false,
        };
        s.apply(StateUpdate::Strategy(first)).unwrap();
        s.apply(StateUpdate::Strategy(StrategySelection {
            strategy: SearchStrategy::Local,
            fallback: true,
        }))
        .unwrap();
        assert_eq!(s.strategy(), Some(first));
    }

    #[test]
    fn test_final_answer_not_overwritten() {
        let mut s = PipelineState::new("q");
        s.apply(StateUpdate::FinalAnswer("first".into())).unwrap();
        s.apply(StateUpdate::FinalAnswer("second".into())).unwrap();
        assert_eq!(s.final_answer(), Some("first"));
    }

    #[test]
    fn test_lists_append_in_arrival_order() {
        let mut s = PipelineState::new("q");
        s.apply(StateUpdate::Structured(vec![item("a")])).unwrap();
        s.apply(StateUpdate::Structured(vec![item("b"), item("c")]))
            .unwrap();
        let texts: Vec<&str> = s.structured().iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_append_is_order_insensitive_as_a_set() {
        let a = vec![item("a")];
        let b = vec![item("b")];

        let mut s1 = PipelineState::new("q");
        s1.apply_all([StateUpdate::Risk(a.clone()), StateUpdate::Risk(b.clone())])
            .unwrap();
        let mut s2 = PipelineState::new("q");
        s2.apply_all([StateUpdate::Risk(b), StateUpdate::Risk(a)])
            .unwrap();

        let set = |s: &PipelineState| -> HashSet<String> {
            s.risk_signals().iter().map(|i| i.text.clone()).collect()
        };
        assert_eq!(set(&s1), set(&s2));
        assert_eq!(s1.risk_signals().len(), 2);
    }

    #[test]
    fn test_scalar_rejects_append_rule() {
        let mut slot = None;
        let err = merge_value(StateField::Intent, MergeRule::Append, &mut slot, Intent::Debug)
            .unwrap_err();
        assert_eq!(
            err,
            StateError::RuleMismatch {
                field: StateField::Intent,
                rule: MergeRule::Append
            }
        );
    }

    #[test]
    fn test_list_rules_in_isolation() {
        let mut v = vec![1];
        assert_eq!(merge_list(MergeRule::FirstWins, &mut v, vec![2]), MergeOutcome::Ignored);
        assert_eq!(v, vec![1]);
        assert_eq!(merge_list(MergeRule::LastWins, &mut v, vec![3]), MergeOutcome::Applied);
        assert_eq!(v, vec![3]);
        assert_eq!(merge_list(MergeRule::Append, &mut v, vec![4]), MergeOutcome::Applied);
        assert_eq!(v, vec![3, 4]);
    }
}
