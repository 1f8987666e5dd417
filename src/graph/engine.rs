//! Bounded breadth-first graph expansion
//!
//! Each level asks the content service to extract entities and relationships
//! around every entity first discovered at the previous level. A failed or
//! empty extraction only silences that node.

use super::summary::GraphSummary;
use super::{Entity, EntityCategory, EntityMerge, KnowledgeGraph};
use crate::content::{self, check_unit_interval, ContentService, ContentTask, SchemaDescriptor, StructuredOutput};
use crate::error::OrchestrationError;
use crate::fetch::{DataFetcher, FetchKind, FetchQuery};
use crate::Result;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Each level costs one extraction per frontier entity.
pub const MAX_GRAPH_DEPTH: u32 = 3;

const SUMMARY_TOP_K: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub relation: String,
    pub target: String,
    #[serde(default)]
    pub context: String,
}

/// What the content service reports around one entity.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationExtraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelation>,
}

impl StructuredOutput for RelationExtraction {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "relation_extraction",
        required_fields: &["relationships"],
    };

    /// Categories are checked per entity at merge time.
    fn validate(&self) -> std::result::Result<(), String> {
        for entity in &self.entities {
            check_unit_interval("confidence", entity.confidence)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphNarrative {
    pub narrative: String,
}

impl StructuredOutput for GraphNarrative {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        name: "graph_narrative",
        required_fields: &["narrative"],
    };

    fn validate(&self) -> std::result::Result<(), String> {
        if self.narrative.trim().is_empty() {
            return Err("narrative is empty".to_string());
        }
        Ok(())
    }
}

/// Filter out low-quality names: too short, or bare numbers like prices
/// and percentages.
pub fn is_relevant_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.chars().count() < 2 {
        return false;
    }
    let numeric = trimmed.replacen('.', "", 1).replacen('%', "", 1).replacen(',', "", 1);
    !numeric.chars().all(|c| c.is_ascii_digit())
}

pub struct KnowledgeGraphEngine {
    service: Arc<dyn ContentService>,
    fetcher: Option<Arc<dyn DataFetcher>>,
}

impl KnowledgeGraphEngine {
    pub fn new(service: Arc<dyn ContentService>) -> Self {
        Self {
            service,
            fetcher: None,
        }
    }

    /// Fetch background text for each frontier entity before extraction.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn DataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub async fn expand(&self, seed: &str, max_depth: u32) -> Result<KnowledgeGraph> {
        self.expand_entity(Entity::new(seed, EntityCategory::Company, 1.0), max_depth)
            .await
    }

    pub async fn expand_entity(&self, seed: Entity, max_depth: u32) -> Result<KnowledgeGraph> {
        if seed.name.is_empty() {
            return Err(OrchestrationError::InvalidInput("seed entity is empty".to_string()));
        }
        if !(1..=MAX_GRAPH_DEPTH).contains(&max_depth) {
            return Err(OrchestrationError::InvalidInput(format!(
                "max_depth must be within 1..={}, got {}",
                MAX_GRAPH_DEPTH, max_depth
            )));
        }

        info!(seed = %seed.name, max_depth, "Expanding knowledge graph");

        let mut graph = KnowledgeGraph::new(seed.clone(), max_depth);
        let mut frontier = vec![seed];

        for depth in 1..=max_depth {
            let mut next = Vec::new();

            for entity in &frontier {
                let extraction = match self.extract_around(entity).await {
                    Ok(extraction) => extraction,
                    Err(e) => {
                        warn!(entity = %entity.name, depth, error = %e, "Extraction failed, node contributes no edges");
                        continue;
                    }
                };

                let discovered = merge_extraction(&mut graph, entity, &extraction, depth);
                debug!(entity = %entity.name, depth, discovered = discovered.len(), "Merged extraction");
                next.extend(discovered);
            }

            if next.is_empty() {
                info!(depth, "No new entities discovered, stopping expansion");
                break;
            }
            frontier = next;
        }

        info!(
            seed = %graph.seed(),
            entities = graph.entity_count(),
            relationships = graph.relationship_count(),
            "Graph expansion complete"
        );

        Ok(graph)
    }

    /// Structural report; never touches the content service.
    pub fn summarize(&self, graph: &KnowledgeGraph) -> GraphSummary {
        GraphSummary::from_graph(graph, SUMMARY_TOP_K)
    }

    /// Narrative view of the structural summary around `focus`.
    pub async fn narrate(&self, graph: &KnowledgeGraph, focus: &str) -> Result<String> {
        let summary = self.summarize(graph);
        let narrative: GraphNarrative = content::generate(
            self.service.as_ref(),
            ContentTask::NarrateGraph,
            "Explain what this entity graph reveals about the focus entity for an investor.",
            json!({
                "focus_entity": focus,
                "structural_summary": summary.to_string(),
                "focus_context": graph.entity_context(focus),
            }),
        )
        .await?;
        Ok(narrative.narrative)
    }

    async fn extract_around(&self, entity: &Entity) -> Result<RelationExtraction> {
        let background = match &self.fetcher {
            Some(fetcher) => {
                let kind = match entity.category {
                    EntityCategory::Company | EntityCategory::Security => FetchKind::News,
                    _ => FetchKind::Background,
                };
                match fetcher.fetch(&FetchQuery::new(kind, entity.name.clone())).await {
                    Ok(data) => Some(data.content),
                    Err(e) => {
                        debug!(entity = %entity.name, error = %e, "No background text, extracting from name only");
                        None
                    }
                }
            }
            None => None,
        };

        content::generate(
            self.service.as_ref(),
            ContentTask::ExtractRelations,
            "List financially relevant entities related to the given entity and the relationships between them.",
            json!({
                "entity": entity.name,
                "category": entity.category,
                "background": background,
                "allowed_categories": EntityCategory::ALL,
            }),
        )
        .await
    }
}

/// Merge one extraction into the graph; returns entities inserted for the
/// first time. Relationship endpoints the extraction did not list as
/// entities join the graph as companies at default confidence.
fn merge_extraction(
    graph: &mut KnowledgeGraph,
    around: &Entity,
    extraction: &RelationExtraction,
    depth: u32,
) -> Vec<Entity> {
    let mut discovered = Vec::new();

    for extracted in &extraction.entities {
        if !is_relevant_name(&extracted.name) {
            continue;
        }
        let category = match extracted.category.parse::<EntityCategory>() {
            Ok(category) => category,
            Err(e) => {
                warn!(entity = %extracted.name, error = %e, "Skipping entity outside the category taxonomy");
                continue;
            }
        };
        let entity = Entity::new(&extracted.name, category, extracted.confidence);
        if let EntityMerge::Inserted(_) = graph.merge_entity(entity.clone()) {
            discovered.push(entity);
        }
    }

    for rel in &extraction.relationships {
        if !is_relevant_name(&rel.source) || !is_relevant_name(&rel.target) {
            debug!(source = %rel.source, target = %rel.target, "Skipped relationship with irrelevant endpoint");
            continue;
        }
        for endpoint in [&rel.source, &rel.target] {
            if graph.contains(endpoint) {
                continue;
            }
            let entity = endpoint_entity(extraction, endpoint);
            if let EntityMerge::Inserted(_) = graph.merge_entity(entity.clone()) {
                discovered.push(entity);
            }
        }

        let context = if rel.context.is_empty() {
            format!("discovered while expanding {}", around.name)
        } else {
            rel.context.clone()
        };
        if !graph.add_relationship(&rel.source, &rel.relation, &rel.target, &context, depth) {
            debug!(source = %rel.source, target = %rel.target, relation = %rel.relation, "Skipped relationship");
        }
    }

    discovered
}

fn endpoint_entity(extraction: &RelationExtraction, name: &str) -> Entity {
    let listed = extraction
        .entities
        .iter()
        .find(|e| super::identity_key(&e.name) == super::identity_key(name));
    match listed.and_then(|e| e.category.parse::<EntityCategory>().ok().map(|c| (c, e.confidence))) {
        Some((category, confidence)) => Entity::new(name, category, confidence),
        None => Entity::new(name, EntityCategory::Company, default_confidence()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ScriptedContentService;
    use crate::fetch::StaticDataFetcher;
    use serde_json::{json, Value};

    fn extraction_for(entity: &str) -> Value {
        match entity {
            "Acme Corp" => json!({
                "entities": [{"name": "Globex", "category": "company", "confidence": 0.9}],
                "relationships": [{"source": "Acme Corp", "relation": "partners_with", "target": "Globex"}]
            }),
            "Globex" => json!({
                "entities": [
                    {"name": "Initech", "category": "company", "confidence": 0.7},
                    {"name": "Acme Corp", "category": "company", "confidence": 0.6}
                ],
                "relationships": [{"source": "Globex", "relation": "competes_with", "target": "Initech"}]
            }),
            "Initech" => json!({
                "entities": [{"name": "Bill Lumbergh", "category": "person", "confidence": 0.8}],
                "relationships": [{"source": "Bill Lumbergh", "relation": "leads", "target": "Initech"}]
            }),
            _ => json!({"entities": [], "relationships": []}),
        }
    }

    fn keyed_service() -> Arc<ScriptedContentService> {
        Arc::new(ScriptedContentService::new().with_handler(ContentTask::ExtractRelations, |req| {
            Ok(extraction_for(req.context_str("entity").unwrap_or_default()))
        }))
    }

    #[tokio::test]
    async fn test_two_level_expansion() {
        let engine = KnowledgeGraphEngine::new(keyed_service());
        let graph = engine.expand("Acme Corp", 2).await.unwrap();

        assert_eq!(graph.entity_count(), 3);
        assert_eq!(graph.relationship_count(), 2);
        assert!(graph.contains("Initech"));
        assert_eq!(graph.relationship_views()[1].depth, 2);
        // Rediscovered seed keeps its original confidence.
        assert_eq!(graph.entity("Acme Corp").unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn test_every_edge_has_both_endpoints() {
        let engine = KnowledgeGraphEngine::new(keyed_service());
        let graph = engine.expand("Acme Corp", 3).await.unwrap();
        for r in graph.relationships() {
            assert!(r.source < graph.entity_count());
            assert!(r.target < graph.entity_count());
        }
        assert!(graph.contains("Bill Lumbergh"));
    }

    #[tokio::test]
    async fn test_deeper_expansion_is_a_superset() {
        let engine = KnowledgeGraphEngine::new(keyed_service());
        for depth in 1..MAX_GRAPH_DEPTH {
            let shallow = engine.expand("Acme Corp", depth).await.unwrap();
            let deep = engine.expand("Acme Corp", depth + 1).await.unwrap();
            for entity in shallow.entities() {
                assert!(deep.contains(&entity.name), "{} missing at depth {}", entity.name, depth + 1);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_node_does_not_abort_traversal() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_response(
                    ContentTask::ExtractRelations,
                    json!({
                        "entities": [
                            {"name": "Globex", "category": "company", "confidence": 0.9},
                            {"name": "Hooli", "category": "company", "confidence": 0.9}
                        ],
                        "relationships": [
                            {"source": "Acme Corp", "relation": "partners_with", "target": "Globex"},
                            {"source": "Acme Corp", "relation": "acquired", "target": "Hooli"}
                        ]
                    }),
                )
                .with_failure(ContentTask::ExtractRelations, "timeout")
                .with_response(
                    ContentTask::ExtractRelations,
                    json!({
                        "entities": [{"name": "Pied Piper", "category": "company", "confidence": 0.5}],
                        "relationships": [{"source": "Hooli", "relation": "competes_with", "target": "Pied Piper"}]
                    }),
                ),
        );

        let engine = KnowledgeGraphEngine::new(service);
        let graph = engine.expand("Acme Corp", 2).await.unwrap();

        assert_eq!(graph.entity_count(), 4);
        assert_eq!(graph.relationship_count(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_fixed_point() {
        let service = Arc::new(ScriptedContentService::new().with_default(
            ContentTask::ExtractRelations,
            json!({"entities": [], "relationships": []}),
        ));
        let engine = KnowledgeGraphEngine::new(service.clone());
        let graph = engine.expand("Acme Corp", 3).await.unwrap();

        assert_eq!(graph.entity_count(), 1);
        assert_eq!(service.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_taxonomy_entity_is_skipped() {
        let service = Arc::new(ScriptedContentService::new().with_response(
            ContentTask::ExtractRelations,
            json!({
                "entities": [{"name": "Mars", "category": "planet", "confidence": 0.9}],
                "relationships": []
            }),
        ));
        let engine = KnowledgeGraphEngine::new(service);
        let graph = engine.expand("Acme Corp", 1).await.unwrap();
        assert_eq!(graph.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_one_bad_category_keeps_the_rest() {
        let service = Arc::new(ScriptedContentService::new().with_response(
            ContentTask::ExtractRelations,
            json!({
                "entities": [
                    {"name": "Mars", "category": "planet", "confidence": 0.9},
                    {"name": "Globex", "category": "company", "confidence": 0.8},
                    {"name": "SEC", "category": "regulator", "confidence": 0.7}
                ],
                "relationships": [
                    {"source": "Acme Corp", "relation": "partners_with", "target": "Globex"},
                    {"source": "SEC", "relation": "regulates", "target": "Acme Corp"}
                ]
            }),
        ));
        let engine = KnowledgeGraphEngine::new(service);
        let graph = engine.expand("Acme Corp", 1).await.unwrap();

        assert_eq!(graph.entity_count(), 3);
        assert_eq!(graph.relationship_count(), 2);
        assert!(!graph.contains("Mars"));
        assert_eq!(graph.entity("SEC").unwrap().category, EntityCategory::Regulator);
    }

    fn relationships_only(entity: &str) -> Value {
        match entity {
            "Acme Corp" => json!({
                "relationships": [{"source": "Acme Corp", "relation": "partners_with", "target": "Globex"}]
            }),
            "Globex" => json!({
                "relationships": [{"source": "Globex", "relation": "competes_with", "target": "Initech"}]
            }),
            _ => json!({"relationships": []}),
        }
    }

    #[tokio::test]
    async fn test_relationship_endpoints_join_the_graph() {
        let service = Arc::new(ScriptedContentService::new().with_handler(ContentTask::ExtractRelations, |req| {
            Ok(relationships_only(req.context_str("entity").unwrap_or_default()))
        }));
        let engine = KnowledgeGraphEngine::new(service);
        let graph = engine.expand("Acme Corp", 2).await.unwrap();

        assert_eq!(graph.entity_count(), 3);
        assert_eq!(graph.relationship_count(), 2);
        let initech = graph.entity("Initech").unwrap();
        assert_eq!(initech.category, EntityCategory::Company);
        assert_eq!(initech.confidence, 0.5);
        assert_eq!(engine.summarize(&graph).most_central().unwrap().name, "Globex");
    }

    #[tokio::test]
    async fn test_expand_then_summarize_finds_hub() {
        let engine = KnowledgeGraphEngine::new(keyed_service());
        let graph = engine.expand("Acme Corp", 2).await.unwrap();
        let summary = engine.summarize(&graph);

        let hub = summary.most_central().unwrap();
        assert_eq!(hub.name, "Globex");
        assert_eq!(hub.degree, 2);
        assert_eq!(summary.entity_count, 3);
        assert_eq!(summary.relation_histogram["partners_with"], 1);
        assert_eq!(summary.relation_histogram["competes_with"], 1);
    }

    #[tokio::test]
    async fn test_irrelevant_names_are_dropped() {
        let service = Arc::new(ScriptedContentService::new().with_response(
            ContentTask::ExtractRelations,
            json!({
                "entities": [
                    {"name": "12.5%", "category": "security", "confidence": 0.9},
                    {"name": "X", "category": "company", "confidence": 0.9},
                    {"name": "Initech", "category": "company", "confidence": 0.9}
                ],
                "relationships": [{"source": "Acme Corp", "relation": "mentions", "target": "12.5%"}]
            }),
        ));
        let engine = KnowledgeGraphEngine::new(service);
        let graph = engine.expand("Acme Corp", 1).await.unwrap();

        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_depth() {
        let engine = KnowledgeGraphEngine::new(keyed_service());
        assert!(matches!(
            engine.expand("Acme Corp", 0).await,
            Err(OrchestrationError::InvalidInput(_))
        ));
        assert!(engine.expand("Acme Corp", MAX_GRAPH_DEPTH + 1).await.is_err());
        assert!(engine.expand("   ", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_background_text_is_passed_to_extraction() {
        let service = Arc::new(ScriptedContentService::new().with_default(
            ContentTask::ExtractRelations,
            json!({"entities": [], "relationships": []}),
        ));
        let fetcher = StaticDataFetcher::new().with_document(FetchKind::News, "Acme Corp", "Acme signs deal");
        let engine = KnowledgeGraphEngine::new(service.clone()).with_fetcher(Arc::new(fetcher));
        engine.expand("Acme Corp", 1).await.unwrap();

        let call = &service.calls()[0];
        assert_eq!(call.context_str("background"), Some("Acme signs deal"));
    }

    #[tokio::test]
    async fn test_narrate_passes_summary_through() {
        let service = Arc::new(
            ScriptedContentService::new()
                .with_handler(ContentTask::ExtractRelations, |req| {
                    Ok(extraction_for(req.context_str("entity").unwrap_or_default()))
                })
                .with_response(ContentTask::NarrateGraph, json!({"narrative": "Globex is the hub."})),
        );
        let engine = KnowledgeGraphEngine::new(service.clone());
        let graph = engine.expand("Acme Corp", 2).await.unwrap();
        let text = engine.narrate(&graph, "Globex").await.unwrap();

        assert_eq!(text, "Globex is the hub.");
        let call = &service.calls_for(ContentTask::NarrateGraph)[0];
        assert!(call.context_str("structural_summary").unwrap().contains("Globex"));
    }

    #[test]
    fn test_is_relevant_name() {
        assert!(is_relevant_name("Globex"));
        assert!(is_relevant_name("3M"));
        assert!(!is_relevant_name("42"));
        assert!(!is_relevant_name("1,250.75"));
        assert!(!is_relevant_name("7%"));
        assert!(!is_relevant_name(" a "));
    }
}
