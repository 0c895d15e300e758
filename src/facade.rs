//! Tool Facade — validates tool arguments, invokes the core, formats
//! human-readable replies
//!
//! Every method here is infallible from the transport's point of view: any
//! error surfacing from the engine is converted to a textual reply instead
//! of propagating, per the propagation policy — the engine never crashes
//! the transport.

use std::sync::Arc;

use crate::assembler::{ContextAssembler, RetrieveFilters};
use crate::graph::KnowledgeGraph;
use crate::manager::MemoryManager;
use crate::session::SessionRegistry;
use crate::types::MemoryKind;

const MIN_CONTENT_TOKENS: usize = 10;
const WARN_CONTENT_TOKENS: usize = 25;

fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

pub struct ToolFacade {
    manager: Arc<MemoryManager>,
    assembler: Arc<ContextAssembler>,
    sessions: Arc<SessionRegistry>,
    graph: Arc<KnowledgeGraph>,
}

impl ToolFacade {
    #[must_use]
    pub fn new(
        manager: Arc<MemoryManager>,
        assembler: Arc<ContextAssembler>,
        sessions: Arc<SessionRegistry>,
        graph: Arc<KnowledgeGraph>,
    ) -> Self {
        Self {
            manager,
            assembler,
            sessions,
            graph,
        }
    }

    pub async fn session_start(&self) -> String {
        let manager = self.manager.clone();
        let hook: crate::session::ArchiveHook = Box::new(move |session_id| {
            Box::pin(async move { manager.archive_working(&session_id).await.ok().flatten() })
                as std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send>>
        });
        match self.sessions.start(Some(hook)).await {
            Ok(result) => {
                self.manager.clear_working();
                let mut reply = format!("session started: {}", result.new_id);
                if let Some(prev) = &result.previous_id {
                    reply.push_str(&format!(" (previous session {prev} archived: {})", result.archived));
                }
                reply
            }
            Err(e) => format!("ERROR: failed to start session: {e}"),
        }
    }

    pub async fn memory_store(&self, content: &str, kind: MemoryKind, confidence: f64, entities: &[String]) -> String {
        let words = word_count(content);
        if words < MIN_CONTENT_TOKENS {
            return format!(
                "REJECTED: content is too short ({words} words, minimum {MIN_CONTENT_TOKENS}): {content:?}. \
                 Try a fuller sentence, e.g. \"User prefers dark mode in the editor and terminal.\""
            );
        }

        match self.manager.store(content, kind, confidence.clamp(0.0, 1.0), entities).await {
            Ok(result) => {
                let mut reply = format!(
                    "stored memory {} at tier {} (entities: {}, facts: {}, vector: {})",
                    result.memory_id,
                    result.tier,
                    result.entities_created.join(", "),
                    result.facts_stored,
                    result.vector_id.as_deref().unwrap_or("none")
                );
                if words < WARN_CONTENT_TOKENS {
                    reply.push_str(&format!(" [warning: short content, {words} words]"));
                }
                reply
            }
            Err(e) => format!("ERROR: failed to store memory: {e}"),
        }
    }

    pub async fn memory_retrieve(&self, query: &str, token_budget: Option<usize>, filters: RetrieveFilters) -> String {
        match self.assembler.retrieve(query, token_budget, &filters).await {
            Ok(result) => result.text,
            Err(e) => format!("ERROR: failed to retrieve memory: {e}"),
        }
    }

    pub async fn memory_compress(&self, scope: &str) -> String {
        match self.manager.compress(scope).await {
            Ok(report) => report,
            Err(e) => format!("ERROR: failed to compress: {e}"),
        }
    }

    pub async fn memory_forget(&self, memory_id: &str, action: &str, correction: Option<&str>) -> String {
        if action == "correct" && correction.is_none() {
            return "ERROR: correct requires a correction".to_string();
        }
        match self.manager.forget(memory_id, action, correction).await {
            Ok(report) => report,
            Err(e) => format!("ERROR: failed to forget: {e}"),
        }
    }

    pub fn memory_status(&self) -> String {
        match self.manager.status() {
            Ok(status) => {
                let mut tiers: Vec<_> = status.tiers.into_iter().collect();
                tiers.sort_by_key(|(tier, _)| *tier);
                let tier_report = tiers
                    .iter()
                    .map(|(tier, stats)| format!("tier{tier}: {} entries, ~{} tokens", stats.count, stats.token_estimate))
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!(
                    "{tier_report} | entities: {} | relations: {} | vectors: {} | session: {}",
                    status.entities,
                    status.relations,
                    status.vectors,
                    status.session_id.as_deref().unwrap_or("none")
                )
            }
            Err(e) => format!("ERROR: failed to read status: {e}"),
        }
    }

    pub fn graph_query(&self, entity: &str, relation: Option<&str>, depth: u32) -> String {
        if let Some(predicate) = relation {
            return match self.graph.query_by_predicate(predicate) {
                Ok(facts) if facts.is_empty() => format!("no facts found for predicate {predicate:?}"),
                Ok(facts) => facts
                    .into_iter()
                    .map(|f| {
                        if f.confidence < 1.0 {
                            format!("{} → {} → {} [conf:{:.2}]", f.subject_label, f.predicate, f.object_label, f.confidence)
                        } else {
                            format!("{} → {} → {}", f.subject_label, f.predicate, f.object_label)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("ERROR: failed to query by predicate: {e}"),
            };
        }
        match self.graph.query_entity(entity, depth) {
            Ok(Some(result)) => result.text,
            Ok(None) => format!("not found: {entity}"),
            Err(e) => format!("ERROR: failed to query entity: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ContextAssembler;
    use crate::config::{AssemblerMode, RankingConfig, TokenBudgetsConfig};
    use crate::embedder::cached::CachedEmbedder;
    use crate::embedder::{make_provider, Embedder};
    use crate::store::DurableStore;
    use crate::vector::VectorStore;
    use std::sync::Arc;

    async fn fresh() -> (ToolFacade, tempfile::TempDir) {
        let (store, dir) = DurableStore::open_temp().await.unwrap();
        let store = Arc::new(store);
        let vector = Arc::new(VectorStore::new(store.clone()));
        let graph = Arc::new(KnowledgeGraph::new(store.clone()));
        let sessions = Arc::new(SessionRegistry::new(store.clone()));
        let raw_embedder = Arc::new(Embedder::new(8, || make_provider("none", 8, "none")));
        let embedder = Arc::new(CachedEmbedder::new(raw_embedder, 64));
        let manager = Arc::new(MemoryManager::new(
            store.clone(),
            vector.clone(),
            graph.clone(),
            sessions.clone(),
            embedder.clone(),
            TokenBudgetsConfig::default(),
            crate::config::CompressionConfig::default(),
        ));
        let assembler = Arc::new(ContextAssembler::new(
            store,
            vector,
            graph.clone(),
            sessions.clone(),
            manager.clone(),
            embedder,
            TokenBudgetsConfig::default(),
            RankingConfig::default(),
            AssemblerMode::SessionIsolated,
        ));
        let facade = ToolFacade::new(manager, assembler, sessions, graph);
        (facade, dir)
    }

    #[tokio::test]
    async fn short_content_is_rejected_with_marker() {
        let (facade, _dir) = fresh().await;
        facade.session_start().await;
        let reply = facade.memory_store("too short", MemoryKind::Event, 1.0, &[]).await;
        assert!(reply.contains("REJECTED"));
        assert!(reply.contains("too short"));
    }

    #[tokio::test]
    async fn valid_content_is_stored() {
        let (facade, _dir) = fresh().await;
        facade.session_start().await;
        let reply = facade
            .memory_store("This is a perfectly reasonable test sentence to store.", MemoryKind::Event, 1.0, &[])
            .await;
        assert!(reply.starts_with("stored memory"));
    }

    #[tokio::test]
    async fn forget_correct_without_correction_errors() {
        let (facade, _dir) = fresh().await;
        facade.session_start().await;
        let reply = facade.memory_forget("whatever-id", "correct", None).await;
        assert!(reply.contains("ERROR"));
    }
}
