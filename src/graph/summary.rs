//! Structural reporting over a finished graph. Pure computation.

use super::{EntityCategory, KnowledgeGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const MAX_CONNECTION_CONTEXT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntity {
    pub name: String,
    pub category: EntityCategory,
    pub degree: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub seed: String,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub top_hubs: Vec<RankedEntity>,
    pub relation_histogram: BTreeMap<String, usize>,
    pub category_histogram: BTreeMap<EntityCategory, usize>,
}

impl GraphSummary {
    pub fn from_graph(graph: &KnowledgeGraph, top_k: usize) -> Self {
        let mut relation_histogram = BTreeMap::new();
        for r in graph.relationships() {
            *relation_histogram.entry(r.relation.clone()).or_insert(0) += 1;
        }

        let mut category_histogram = BTreeMap::new();
        for e in graph.entities() {
            *category_histogram.entry(e.category).or_insert(0) += 1;
        }

        Self {
            seed: graph.seed().to_string(),
            entity_count: graph.entity_count(),
            relationship_count: graph.relationship_count(),
            top_hubs: graph.centrality().into_iter().take(top_k).collect(),
            relation_histogram,
            category_histogram,
        }
    }

    pub fn most_central(&self) -> Option<&RankedEntity> {
        self.top_hubs.first()
    }
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Knowledge graph for {}", self.seed)?;
        writeln!(
            f,
            "{} entities, {} relationships",
            self.entity_count, self.relationship_count
        )?;

        writeln!(f, "Most connected entities:")?;
        for (rank, hub) in self.top_hubs.iter().enumerate() {
            writeln!(
                f,
                "  {}. {} ({}) - {} connections",
                rank + 1,
                hub.name,
                hub.category,
                hub.degree
            )?;
        }

        writeln!(f, "Relationship types:")?;
        for (relation, count) in &self.relation_histogram {
            writeln!(f, "  {}: {}", relation, count)?;
        }

        write!(f, "Entity categories:")?;
        for (category, count) in &self.category_histogram {
            write!(f, "\n  {}: {}", category, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConnection {
    pub entity: String,
    pub relation: String,
    pub direction: Direction,
    pub context: String,
}

/// One entity and its immediate neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityContext {
    pub name: String,
    pub category: EntityCategory,
    pub confidence: f64,
    pub connections: Vec<EntityConnection>,
}

impl KnowledgeGraph {
    /// Degree centrality for every entity, highest first; ties by name.
    pub fn centrality(&self) -> Vec<RankedEntity> {
        let mut ranked: Vec<RankedEntity> = self
            .entities()
            .iter()
            .enumerate()
            .map(|(i, e)| RankedEntity {
                name: e.name.clone(),
                category: e.category,
                degree: self.degree(i),
            })
            .collect();

        ranked.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.name.cmp(&b.name)));
        ranked
    }

    pub fn entity_context(&self, name: &str) -> Option<EntityContext> {
        let index = self.index_of(name)?;
        let entity = &self.entities()[index];

        let connections = self
            .relationships()
            .iter()
            .filter_map(|r| {
                let (other, direction) = if r.source == index {
                    (r.target, Direction::Outgoing)
                } else if r.target == index {
                    (r.source, Direction::Incoming)
                } else {
                    return None;
                };
                Some(EntityConnection {
                    entity: self.entities()[other].name.clone(),
                    relation: r.relation.clone(),
                    direction,
                    context: r.context.chars().take(MAX_CONNECTION_CONTEXT_CHARS).collect(),
                })
            })
            .collect();

        Some(EntityContext {
            name: entity.name.clone(),
            category: entity.category,
            confidence: entity.confidence,
            connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Entity;

    fn acme_graph() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new(Entity::new("Acme Corp", EntityCategory::Company, 1.0), 2);
        g.merge_entity(Entity::new("Globex", EntityCategory::Company, 0.9));
        g.merge_entity(Entity::new("Initech", EntityCategory::Company, 0.7));
        g.add_relationship("Acme Corp", "partners_with", "Globex", "joint venture", 1);
        g.add_relationship("Globex", "competes_with", "Initech", &"c".repeat(300), 2);
        g
    }

    #[test]
    fn test_globex_is_the_hub() {
        let summary = GraphSummary::from_graph(&acme_graph(), 10);
        let hub = summary.most_central().unwrap();
        assert_eq!(hub.name, "Globex");
        assert_eq!(hub.degree, 2);
        assert_eq!(summary.entity_count, 3);
        assert_eq!(summary.relationship_count, 2);
    }

    #[test]
    fn test_ties_break_by_name() {
        let ranked = acme_graph().centrality();
        let names: Vec<_> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Globex", "Acme Corp", "Initech"]);
    }

    #[test]
    fn test_histograms() {
        let mut g = acme_graph();
        g.merge_entity(Entity::new("Jane Doe", EntityCategory::Person, 0.6));
        g.add_relationship("Jane Doe", "leads", "Globex", "", 2);

        let summary = GraphSummary::from_graph(&g, 2);
        assert_eq!(summary.top_hubs.len(), 2);
        assert_eq!(summary.relation_histogram["partners_with"], 1);
        assert_eq!(summary.category_histogram[&EntityCategory::Company], 3);
        assert_eq!(summary.category_histogram[&EntityCategory::Person], 1);

        let text = summary.to_string();
        assert!(text.contains("1. Globex (company) - 3 connections"));
        assert!(text.contains("leads: 1"));
    }

    #[test]
    fn test_entity_context_lists_both_directions() {
        let ctx = acme_graph().entity_context("globex").unwrap();
        assert_eq!(ctx.connections.len(), 2);
        assert_eq!(ctx.connections[0].entity, "Acme Corp");
        assert_eq!(ctx.connections[0].direction, Direction::Incoming);
        assert_eq!(ctx.connections[1].direction, Direction::Outgoing);
        assert_eq!(ctx.connections[1].context.len(), MAX_CONNECTION_CONTEXT_CHARS);
    }

    #[test]
    fn test_entity_context_unknown() {
        assert!(acme_graph().entity_context("Hooli").is_none());
    }
}
