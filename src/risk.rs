//! Deterministic risk signals for the risk evidence list.

use crate::models::{EvidenceItem, EvidenceKind, EvidenceSource, Intent};

/// One signal per query: refactors are high risk, anything mentioning
/// deletion is critical, everything else is informational.
pub fn assess(intent: Intent, query: &str) -> Vec<EvidenceItem> {
    let signal = if intent == Intent::Refactor {
        "HIGH RISK: Refactoring may break dependent modules."
    } else if query.to_lowercase().contains("delete") {
        "CRITICAL: Deletion of files detected."
    } else {
        "Low risk: Query is informational."
    };
    vec![EvidenceItem::new(
        EvidenceSource::Risk,
        EvidenceKind::Signal,
        signal,
    )]
}
