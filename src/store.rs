//! Evidence store accessor.
//!
//! Loads the three tables exported by the index build (entities, text units,
//! relationships) into memory and exposes the substring/equality lookups the
//! structured engine needs. The tables are JSON arrays; they live either
//! directly in the configured output directory or in its most recently
//! modified subdirectory (one folder per index run).
//!
//! A loaded [`EvidenceStore`] is immutable and can be shared across tasks.

use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::error::RetrievalError;
use crate::models::{Entity, Relationship, TextUnit};

pub const ENTITIES_FILE: &str = "entities.json";
pub const TEXT_UNITS_FILE: &str = "text_units.json";
pub const RELATIONSHIPS_FILE: &str = "relationships.json";

/// The three evidence tables held in memory. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct EvidenceStore {
    dir: PathBuf,
    entities: Vec<Entity>,
    text_units: HashMap<String, String>,
    relationships: Vec<Relationship>,
}

/// Finds the directory holding the evidence tables under `output_dir`.
///
/// A flat layout wins; otherwise the newest subdirectory that contains an
/// entities table is used.
pub fn locate_output_dir(output_dir: &Path) -> Option<PathBuf> {
    if output_dir.join(ENTITIES_FILE).is_file() {
        return Some(output_dir.to_path_buf());
    }

    WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path().join(ENTITIES_FILE).is_file())
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.into_path())
        })
        .max()
        .map(|(_, path)| path)
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RetrievalError> {
    let content = std::fs::read_to_string(path).map_err(|e| RetrievalError::StoreUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| RetrievalError::StoreUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_optional_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RetrievalError> {
    if path.is_file() {
        read_table(path)
    } else {
        tracing::debug!(path = %path.display(), "optional table absent, treating as empty");
        Ok(Vec::new())
    }
}

impl EvidenceStore {
    /// Loads the tables found under `output_dir`.
    ///
    /// The entities table is required; text units and relationships default
    /// to empty when absent.
    pub fn open(output_dir: &Path) -> Result<Self, RetrievalError> {
        let dir = locate_output_dir(output_dir).ok_or_else(|| RetrievalError::StoreMissing {
            table: ENTITIES_FILE,
            dir: output_dir.to_path_buf(),
        })?;

        let entities: Vec<Entity> = read_table(&dir.join(ENTITIES_FILE))?;
        let text_units: Vec<TextUnit> = read_optional_table(&dir.join(TEXT_UNITS_FILE))?;
        let relationships: Vec<Relationship> =
            read_optional_table(&dir.join(RELATIONSHIPS_FILE))?;

        tracing::debug!(
            dir = %dir.display(),
            entities = entities.len(),
            text_units = text_units.len(),
            relationships = relationships.len(),
            "evidence store loaded"
        );

        Ok(Self::from_tables(dir, entities, text_units, relationships))
    }

    /// Builds a store from tables already in memory. `dir` is recorded for
    /// messages only.
    pub fn from_tables(
        dir: PathBuf,
        entities: Vec<Entity>,
        text_units: Vec<TextUnit>,
        relationships: Vec<Relationship>,
    ) -> Self {
        let text_units = text_units.into_iter().map(|t| (t.id, t.text)).collect();
        Self {
            dir,
            entities,
            text_units,
            relationships,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Entities whose title contains `keyword`, case-insensitively, in table order.
    pub fn title_matches<'a>(&'a self, keyword: &str) -> impl Iterator<Item = &'a Entity> + 'a {
        let needle = keyword.to_lowercase();
        self.entities
            .iter()
            .filter(move |e| e.title.to_lowercase().contains(&needle))
    }

    /// Entities whose description contains `keyword`, case-insensitively, in table order.
    pub fn description_matches<'a>(
        &'a self,
        keyword: &str,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        let needle = keyword.to_lowercase();
        self.entities.iter().filter(move |e| {
            e.description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
        })
    }

    /// The first `limit` entities of exactly `entity_type`, in table order.
    pub fn entities_of_type<'a>(
        &'a self,
        entity_type: &'a str,
        limit: usize,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities
            .iter()
            .filter(move |e| e.entity_type.as_deref() == Some(entity_type))
            .take(limit)
    }

    /// Bodies of the entity's text units, following its id list. Unknown and
    /// repeated ids are skipped.
    pub fn text_units_for(&self, entity: &Entity) -> Vec<&str> {
        let mut seen = HashSet::new();
        entity
            .text_unit_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.text_units.get(id).map(String::as_str))
            .collect()
    }
}
