//! Cross-module properties that only show up once the durable store, the
//! knowledge graph, the manager and the assembler are wired together.

use std::sync::Arc;

use latentcontext::assembler::{ContextAssembler, RetrieveFilters};
use latentcontext::config::{AssemblerMode, RankingConfig, TokenBudgetsConfig};
use latentcontext::embedder::{make_provider, CachedEmbedder, Embedder};
use latentcontext::graph::KnowledgeGraph;
use latentcontext::manager::MemoryManager;
use latentcontext::session::SessionRegistry;
use latentcontext::store::DurableStore;
use latentcontext::types::MemoryKind;
use latentcontext::vector::VectorStore;

struct Harness {
    manager: Arc<MemoryManager>,
    assembler: Arc<ContextAssembler>,
    sessions: Arc<SessionRegistry>,
    _dir: tempfile::TempDir,
}

async fn harness(mode: AssemblerMode, budgets: TokenBudgetsConfig) -> Harness {
    let (store, dir) = DurableStore::open_temp().await.unwrap();
    let store = Arc::new(store);
    let vector = Arc::new(VectorStore::new(store.clone()));
    let graph = Arc::new(KnowledgeGraph::new(store.clone()));
    let sessions = Arc::new(SessionRegistry::new(store.clone()));
    let raw_embedder = Arc::new(Embedder::new(8, || make_provider("local", 8, "local")));
    let embedder = Arc::new(CachedEmbedder::new(raw_embedder, 64));
    let manager = Arc::new(MemoryManager::new(
        store.clone(),
        vector.clone(),
        graph.clone(),
        sessions.clone(),
        embedder.clone(),
        budgets,
        latentcontext::config::CompressionConfig::default(),
    ));
    let assembler = Arc::new(ContextAssembler::new(
        store,
        vector,
        graph,
        sessions.clone(),
        manager.clone(),
        embedder,
        budgets,
        RankingConfig::default(),
        mode,
    ));
    Harness { manager, assembler, sessions, _dir: dir }
}

#[tokio::test]
async fn retrieve_never_exceeds_requested_token_budget() {
    let h = harness(AssemblerMode::CrossSession, TokenBudgetsConfig::default()).await;
    h.sessions.start(None).await.unwrap();
    for i in 0..20 {
        h.manager
            .store(
                &format!("fact number {i} about the weather patterns over the Atlantic ocean this week."),
                MemoryKind::Summary,
                1.0,
                &[],
            )
            .await
            .unwrap();
    }

    let result = h.assembler.retrieve("weather patterns", Some(50), &RetrieveFilters::default()).await.unwrap();
    assert!(result.total_tokens <= 50, "total_tokens {} exceeded budget of 50", result.total_tokens);
}

#[tokio::test]
async fn dedup_is_idempotent_under_near_duplicate_summaries() {
    let h = harness(AssemblerMode::CrossSession, TokenBudgetsConfig::default()).await;
    h.sessions.start(None).await.unwrap();

    h.manager
        .store("The user enjoys long hikes in the mountains every single weekend.", MemoryKind::Summary, 1.0, &[])
        .await
        .unwrap();
    h.manager
        .store("The user enjoys long hikes in the mountains every single weekend!", MemoryKind::Summary, 1.0, &[])
        .await
        .unwrap();

    let result = h.assembler.retrieve("hikes in the mountains", None, &RetrieveFilters::default()).await.unwrap();
    let long_term_sections = result.text.matches("Long-Term Memory:").count();
    assert!(long_term_sections <= 1);
}

#[tokio::test]
async fn session_compress_does_not_mutate_tier3_core_memories() {
    let h = harness(AssemblerMode::CrossSession, TokenBudgetsConfig::default()).await;
    h.sessions.start(None).await.unwrap();

    let core = h
        .manager
        .store("The user's name is Alex and they work as a firmware engineer.", MemoryKind::Core, 1.0, &[])
        .await
        .unwrap();

    for i in 0..3 {
        h.manager
            .store(&format!("session note {i} about the onboarding checklist and its many steps today."), MemoryKind::Summary, 1.0, &[])
            .await
            .unwrap();
    }
    h.manager.compress("session").await.unwrap();

    let status = h.manager.status().unwrap();
    assert_eq!(status.tiers.get(&3).map(|t| t.count).unwrap_or(0), 1);

    let result = h.assembler.retrieve("Alex firmware engineer", None, &RetrieveFilters::default()).await.unwrap();
    assert!(result.text.contains("Alex"));
    let _ = core;
}

#[tokio::test]
async fn active_relation_per_subject_predicate_stays_unique_across_many_writes() {
    let h = harness(AssemblerMode::SessionIsolated, TokenBudgetsConfig::default()).await;
    h.sessions.start(None).await.unwrap();

    for city in ["Berlin", "Tokyo", "Lagos", "Lima"] {
        h.manager
            .store(&format!("User moved to {city} for a new job opportunity this year."), MemoryKind::Fact, 1.0, &["User".into(), city.into()])
            .await
            .unwrap();
    }

    let status = h.manager.status().unwrap();
    assert_eq!(status.relations, 1);
}
