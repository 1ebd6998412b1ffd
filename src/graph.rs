//! Read-only node/link view of the knowledge graph for visualisation.
//!
//! Relationships reference entities by title, so node ids are titles too.

use serde::Serialize;

use crate::models::{Entity, Relationship};
use crate::store::EvidenceStore;

const LABEL_CHARS: usize = 30;

/// One entity. `id` and `name` are both the entity title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    /// Entity type, or `"Unknown"` when the row has none.
    #[serde(rename = "type")]
    pub node_type: String,
    pub description: String,
}

/// One relationship between two node ids (titles).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub weight: f64,
    /// Relationship description, shortened by [`truncate_label`].
    pub label: String,
}

/// Body of `GET /api/graph` and the output of `kc graph`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl GraphView {
    /// Builds the view from every entity and relationship, in table order.
    pub fn from_store(store: &EvidenceStore) -> Self {
        Self {
            nodes: store.entities().iter().map(node).collect(),
            links: store.relationships().iter().map(link).collect(),
        }
    }
}

fn node(entity: &Entity) -> GraphNode {
    GraphNode {
        id: entity.title.clone(),
        name: entity.title.clone(),
        node_type: entity
            .entity_type
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        description: entity.description.clone().unwrap_or_default(),
    }
}

fn link(rel: &Relationship) -> GraphLink {
    GraphLink {
        source: rel.source.clone(),
        target: rel.target.clone(),
        weight: rel.weight,
        label: truncate_label(rel.description.as_deref().unwrap_or_default()),
    }
}

/// First 30 characters plus `...` when longer.
pub fn truncate_label(text: &str) -> String {
    if text.chars().count() > LABEL_CHARS {
        let head: String = text.chars().take(LABEL_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
