//! Entity-relationship knowledge graph
//!
//! Entities live in an arena addressed by canonical name; relationships are
//! index pairs into that arena. The graph only ever grows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub mod engine;
pub mod summary;

pub use engine::{KnowledgeGraphEngine, MAX_GRAPH_DEPTH};
pub use summary::{Direction, EntityConnection, EntityContext, GraphSummary, RankedEntity};

const MAX_CONTEXT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityCategory {
    Company,
    Person,
    Product,
    Regulator,
    Location,
    Event,
    Security,
    Sector,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 8] = [
        EntityCategory::Company,
        EntityCategory::Person,
        EntityCategory::Product,
        EntityCategory::Regulator,
        EntityCategory::Location,
        EntityCategory::Event,
        EntityCategory::Security,
        EntityCategory::Sector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Company => "company",
            EntityCategory::Person => "person",
            EntityCategory::Product => "product",
            EntityCategory::Regulator => "regulator",
            EntityCategory::Location => "location",
            EntityCategory::Event => "event",
            EntityCategory::Security => "security",
            EntityCategory::Sector => "sector",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        EntityCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| format!("unknown entity category '{}'", s))
    }
}

/// Normalized identity of an entity: trimmed, inner whitespace collapsed,
/// compared case-insensitively.
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn identity_key(name: &str) -> String {
    canonical_name(name).to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub name: String,
    pub category: EntityCategory,
    pub confidence: f64,
}

impl Entity {
    pub fn new(name: &str, category: EntityCategory, confidence: f64) -> Self {
        Self {
            name: canonical_name(name),
            category,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Edge between two arena slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub source: usize,
    pub target: usize,
    pub relation: String,
    pub context: String,
    pub depth: u32,
}

/// Relationship with its endpoints resolved to names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipView {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub context: String,
    pub depth: u32,
}

/// Outcome of merging one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityMerge {
    Inserted(usize),
    Merged(usize),
}

impl EntityMerge {
    pub fn index(&self) -> usize {
        match self {
            EntityMerge::Inserted(i) | EntityMerge::Merged(i) => *i,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    seed: String,
    max_depth: u32,
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl KnowledgeGraph {
    /// Singleton graph holding only the seed.
    pub fn new(seed: Entity, max_depth: u32) -> Self {
        let mut graph = Self {
            seed: seed.name.clone(),
            max_depth,
            entities: Vec::new(),
            relationships: Vec::new(),
            index: HashMap::new(),
        };
        graph.merge_entity(seed);
        graph
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.index_of(name).map(|i| &self.entities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(&identity_key(name)).copied()
    }

    /// Insert a new entity, or keep the existing node and raise its
    /// confidence to the maximum seen.
    pub fn merge_entity(&mut self, entity: Entity) -> EntityMerge {
        let key = identity_key(&entity.name);
        match self.index.get(&key) {
            Some(&i) => {
                let existing = &mut self.entities[i];
                existing.confidence = existing.confidence.max(entity.confidence);
                EntityMerge::Merged(i)
            }
            None => {
                let i = self.entities.len();
                self.entities.push(entity);
                self.index.insert(key, i);
                EntityMerge::Inserted(i)
            }
        }
    }

    /// Add an edge between two existing entities. Returns false when either
    /// endpoint is unknown or the same (pair, label) edge already exists.
    pub fn add_relationship(
        &mut self,
        source: &str,
        relation: &str,
        target: &str,
        context: &str,
        depth: u32,
    ) -> bool {
        let (Some(s), Some(t)) = (self.index_of(source), self.index_of(target)) else {
            return false;
        };
        let relation = relation.trim().to_lowercase().replace(' ', "_");
        if relation.is_empty() {
            return false;
        }

        let duplicate = self
            .relationships
            .iter()
            .any(|r| r.source == s && r.target == t && r.relation == relation);
        if duplicate {
            return false;
        }

        self.relationships.push(Relationship {
            source: s,
            target: t,
            relation,
            context: context.chars().take(MAX_CONTEXT_CHARS).collect(),
            depth,
        });
        true
    }

    /// In-degree plus out-degree for the entity at `index`.
    pub fn degree(&self, index: usize) -> usize {
        self.relationships
            .iter()
            .map(|r| usize::from(r.source == index) + usize::from(r.target == index))
            .sum()
    }

    pub fn relationship_views(&self) -> Vec<RelationshipView> {
        self.relationships.iter().map(|r| self.view(r)).collect()
    }

    pub(crate) fn view(&self, r: &Relationship) -> RelationshipView {
        RelationshipView {
            source: self.entities[r.source].name.clone(),
            relation: r.relation.clone(),
            target: self.entities[r.target].name.clone(),
            context: r.context.clone(),
            depth: r.depth,
        }
    }

    /// Rebuild the name index after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (identity_key(&e.name), i))
            .collect();
    }
}
