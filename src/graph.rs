//! Knowledge Graph — bi-temporal entities and relations
//!
//! Entities are looked up case-insensitively by label; relations carry a
//! `[start, end)` interval and are "active" while `end` is absent. Writing a
//! new fact for a `(subject, predicate)` that already has an active relation
//! to a *different* object supersedes the old one instead of duplicating it.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::store::DurableStore;
use crate::types::{generate_id, Entity, Relation};

/// One fact, flattened for `query_by_predicate` results
#[derive(Debug, Clone)]
pub struct Fact {
    pub subject_label: String,
    pub predicate: String,
    pub object_label: String,
    pub confidence: f64,
}

/// Result of `query_entity`: root plus one or two hops of neighborhood
#[derive(Debug, Clone)]
pub struct EntityQueryResult {
    pub root: Entity,
    pub outgoing: Vec<Relation>,
    pub incoming: Vec<Relation>,
    pub neighbors: Vec<Entity>,
    pub text: String,
}

pub struct KnowledgeGraph {
    store: Arc<DurableStore>,
}

impl KnowledgeGraph {
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Case-insensitive lookup-or-create; confidence only ever increases.
    pub fn ensure_entity(
        &self,
        label: &str,
        entity_type: Option<String>,
        properties: Value,
        confidence: f64,
    ) -> Result<String> {
        if let Some(mut existing) = self.store.find_entity_by_label(label)? {
            if confidence > existing.confidence {
                existing.confidence = confidence;
                existing.updated_at = Utc::now();
                self.store.upsert_entity(&existing)?;
            }
            return Ok(existing.id);
        }
        let entity = Entity::new(label.to_string(), entity_type, properties, confidence);
        let id = entity.id.clone();
        self.store.upsert_entity(&entity)?;
        Ok(id)
    }

    fn label_of(&self, entity_id: &str) -> Result<String> {
        Ok(self
            .store
            .get_entity(entity_id)?
            .map_or_else(|| entity_id.to_string(), |e| e.label))
    }

    /// Ensure both endpoints, then upsert the relation with supersession.
    pub fn store_fact(
        &self,
        subject_label: &str,
        predicate: &str,
        object_label: &str,
        properties: Value,
        confidence: f64,
        source_summary_id: Option<String>,
    ) -> Result<String> {
        let subject_id = self.ensure_entity(subject_label, None, Value::Null, confidence)?;
        let object_id = self.ensure_entity(object_label, None, Value::Null, confidence)?;

        let now = Utc::now();
        if let Some(mut active) = self.store.find_active_relation(&subject_id, predicate)? {
            if active.object_id == object_id {
                active.confidence = confidence;
                active.properties = properties;
                active.source_summary_id = source_summary_id;
                self.store.upsert_relation(&active)?;
                return Ok(active.id);
            }
            active.temporal_end = Some(now);
            active.confidence *= 0.5;
            self.store.upsert_relation(&active)?;
        }

        let relation = Relation {
            id: generate_id(),
            subject_id,
            predicate: predicate.to_string(),
            object_id,
            properties,
            temporal_start: now,
            temporal_end: None,
            confidence,
            source_summary_id,
        };
        let id = relation.id.clone();
        self.store.upsert_relation(&relation)?;
        Ok(id)
    }

    /// Look up by exact case-insensitive label, then substring fallback
    /// ordered by confidence, then depth-limited neighborhood expansion.
    pub fn query_entity(&self, label: &str, depth: u32) -> Result<Option<EntityQueryResult>> {
        let root = match self.store.find_entity_by_label(label)? {
            Some(e) => e,
            None => match self.store.find_entities_by_label_substring(label)?.into_iter().next() {
                Some(e) => e,
                None => return Ok(None),
            },
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.id.clone());

        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        let mut frontier: Vec<String> = Vec::new();

        if depth >= 1 {
            outgoing = self
                .store
                .relations_by_subject(&root.id)?
                .into_iter()
                .filter(Relation::is_active)
                .collect::<Vec<_>>();
            incoming = self
                .store
                .relations_by_object(&root.id)?
                .into_iter()
                .filter(Relation::is_active)
                .collect::<Vec<_>>();

            frontier = outgoing
                .iter()
                .map(|r| r.object_id.clone())
                .chain(incoming.iter().map(|r| r.subject_id.clone()))
                .filter(|id| visited.insert(id.clone()))
                .collect();
        }

        if depth > 1 {
            let mut next_frontier = Vec::new();
            for id in &frontier {
                let out2 = self
                    .store
                    .relations_by_subject(id)?
                    .into_iter()
                    .filter(Relation::is_active)
                    .collect::<Vec<_>>();
                let in2 = self
                    .store
                    .relations_by_object(id)?
                    .into_iter()
                    .filter(Relation::is_active)
                    .collect::<Vec<_>>();
                for r in out2.iter().map(|r| r.object_id.clone()).chain(in2.iter().map(|r| r.subject_id.clone())) {
                    if visited.insert(r.clone()) {
                        next_frontier.push(r);
                    }
                }
                outgoing.extend(out2);
                incoming.extend(in2);
            }
            frontier.extend(next_frontier);
        }

        let mut neighbors = Vec::new();
        for id in &frontier {
            if let Some(e) = self.store.get_entity(id)? {
                neighbors.push(e);
            }
        }

        let text = self.serialize(&root, &outgoing, &incoming)?;

        Ok(Some(EntityQueryResult {
            root,
            outgoing,
            incoming,
            neighbors,
            text,
        }))
    }

    fn serialize(&self, root: &Entity, outgoing: &[Relation], incoming: &[Relation]) -> Result<String> {
        let mut lines = vec![format!("Entity: {} ({})", root.label, root.entity_type)];
        for r in outgoing {
            let object_label = self.label_of(&r.object_id)?;
            lines.push(format!("  → {} → {}{}", r.predicate, object_label, conf_suffix(r.confidence)));
        }
        for r in incoming {
            let subject_label = self.label_of(&r.subject_id)?;
            lines.push(format!("  ← {} → {}{}", subject_label, r.predicate, conf_suffix(r.confidence)));
        }
        Ok(lines.join("\n"))
    }

    /// All active relations whose predicate matches case-insensitively
    pub fn query_by_predicate(&self, predicate: &str) -> Result<Vec<Fact>> {
        let relations = self.store.relations_by_predicate(predicate)?;
        let mut facts = Vec::with_capacity(relations.len());
        for r in relations {
            facts.push(Fact {
                subject_label: self.label_of(&r.subject_id)?,
                predicate: r.predicate,
                object_label: self.label_of(&r.object_id)?,
                confidence: r.confidence,
            });
        }
        Ok(facts)
    }

    /// Delete the entity and every relation (active or superseded) it
    /// participates in.
    pub fn remove_entity(&self, label: &str) -> Result<bool> {
        let Some(entity) = self.store.find_entity_by_label(label)? else {
            return Ok(false);
        };
        let mut relation_ids: Vec<String> = self
            .store
            .relations_by_subject(&entity.id)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        relation_ids.extend(self.store.relations_by_object(&entity.id)?.into_iter().map(|r| r.id));
        for id in relation_ids {
            self.store.delete_relation(&id)?;
        }
        self.store.delete_entity(&entity.id)?;
        Ok(true)
    }

    /// Set confidence and mark ended now; invisible to default queries after.
    pub fn deprecate_relation(&self, relation_id: &str, new_confidence: f64) -> Result<bool> {
        let Some(mut relation) = self.store.get_relation(relation_id)? else {
            return Ok(false);
        };
        relation.confidence = new_confidence;
        relation.temporal_end = Some(Utc::now());
        self.store.upsert_relation(&relation)?;
        Ok(true)
    }

    pub fn entity_count(&self) -> Result<usize> {
        self.store.count_entities()
    }

    pub fn active_relation_count(&self) -> Result<usize> {
        self.store.count_active_relations()
    }
}

fn conf_suffix(confidence: f64) -> String {
    if confidence < 1.0 {
        format!(" [conf:{confidence:.2}]")
    } else {
        String::new()
    }
}

/// Scan content against an ordered list of predicate patterns, returning the
/// first match's canonical predicate, or `related_to` if nothing matches.
#[must_use]
pub fn infer_predicate(content: &str) -> &'static str {
    static RULES: &[(&str, &str)] = &[
        ("lives|located|resides|based in", "located_in"),
        ("works (at|for)|employed (at|by)", "works_at"),
        ("likes|loves|enjoys|prefers", "prefers"),
        ("hates|dislikes|avoids", "dislikes"),
        ("is a|is an|is the", "is_a"),
        ("has|owns|possesses", "has"),
        ("knows|met|friends with", "knows"),
        ("wants to|plans to|intends to|going to", "wants_to"),
        ("created|built|made|wrote|authored", "created"),
        ("uses|utilizes", "uses"),
        ("visited|went to|traveled to", "visited"),
        ("learned|studied|knows about", "learned"),
        ("born in|from", "from"),
        ("married to|spouse|partner", "married_to"),
        ("parent|father|mother of", "parent_of"),
        ("child|son|daughter of", "child_of"),
        ("member of|part of|belongs to", "member_of"),
        ("manages|leads|heads", "manages"),
        ("reports to|supervised by", "reports_to"),
        ("teaches|mentors|coaches", "teaches"),
    ];
    for (pattern, canonical) in RULES {
        match regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) if re.is_match(content) => return canonical,
            Err(e) => warn!("bad predicate regex {pattern:?}: {e}"),
            _ => {}
        }
    }
    "related_to"
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> (KnowledgeGraph, tempfile::TempDir) {
        let (store, dir) = DurableStore::open_temp().await.unwrap();
        (KnowledgeGraph::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn case_folded_label_lookup() {
        let (graph, _dir) = fresh().await;
        let id = graph.ensure_entity("User", None, Value::Null, 1.0).unwrap();
        assert_eq!(graph.ensure_entity("USER", None, Value::Null, 0.5).unwrap(), id);
        assert_eq!(graph.ensure_entity("user", None, Value::Null, 0.5).unwrap(), id);
    }

    #[tokio::test]
    async fn confidence_is_monotone_non_decreasing() {
        let (graph, _dir) = fresh().await;
        let id = graph.ensure_entity("User", None, Value::Null, 0.5).unwrap();
        graph.ensure_entity("User", None, Value::Null, 0.3).unwrap();
        assert!((graph.store.get_entity(&id).unwrap().unwrap().confidence - 0.5).abs() < f64::EPSILON);
        graph.ensure_entity("User", None, Value::Null, 0.9).unwrap();
        assert!((graph.store.get_entity(&id).unwrap().unwrap().confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn fact_serializes_without_confidence_tag_when_full_confidence() {
        let (graph, _dir) = fresh().await;
        graph
            .store_fact("User", "located_in", "Paris", Value::Null, 1.0, None)
            .unwrap();
        let result = graph.query_entity("User", 1).unwrap().unwrap();
        assert_eq!(result.text, "Entity: User (unknown)\n  → located_in → Paris");
    }

    #[tokio::test]
    async fn supersession_halves_confidence_and_ends_old_relation() {
        let (graph, _dir) = fresh().await;
        graph
            .store_fact("User", "located_in", "Paris", Value::Null, 1.0, None)
            .unwrap();
        graph
            .store_fact("User", "located_in", "London", Value::Null, 1.0, None)
            .unwrap();

        let result = graph.query_entity("User", 1).unwrap().unwrap();
        assert_eq!(result.outgoing.len(), 1);
        assert_eq!(graph.label_of(&result.outgoing[0].object_id).unwrap(), "London");

        let paris_id = graph.ensure_entity("Paris", None, Value::Null, 0.1).unwrap();
        let relations = graph.store.relations_by_object(&paris_id).unwrap();
        assert_eq!(relations.len(), 1);
        assert!(relations[0].temporal_end.is_some());
        assert!((relations[0].confidence - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn active_relation_uniqueness_per_subject_predicate() {
        let (graph, _dir) = fresh().await;
        graph.store_fact("A", "p", "B", Value::Null, 1.0, None).unwrap();
        graph.store_fact("A", "p", "C", Value::Null, 1.0, None).unwrap();
        graph.store_fact("A", "p", "D", Value::Null, 1.0, None).unwrap();
        assert_eq!(graph.active_relation_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_entity_removes_participating_relations() {
        let (graph, _dir) = fresh().await;
        graph.store_fact("User", "located_in", "Paris", Value::Null, 1.0, None).unwrap();
        assert!(graph.remove_entity("user").unwrap());
        assert_eq!(graph.active_relation_count().unwrap(), 0);
        assert!(graph.query_entity("User", 1).unwrap().is_none());
    }

    #[test]
    fn infers_located_in_from_lives() {
        assert_eq!(infer_predicate("User lives in Paris."), "located_in");
    }

    #[test]
    fn falls_back_to_related_to() {
        assert_eq!(infer_predicate("User is friends with... wait no."), "knows");
        assert_eq!(infer_predicate("completely unmatched content here"), "related_to");
    }
}
