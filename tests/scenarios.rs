//! End-to-end scenarios driven through the public `Engine`/`ToolFacade`
//! surface, mirroring the documented S1/S3/S5/S6 walkthroughs.

use latentcontext::assembler::RetrieveFilters;
use latentcontext::config::{AssemblerConfig, AssemblerMode, CompressionConfig, Config};
use latentcontext::types::MemoryKind;
use latentcontext::Engine;

async fn boot(data_dir: &std::path::Path) -> Engine {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.session.auto_start_on_boot = false;
    Engine::boot(config).await.expect("engine boots")
}

#[tokio::test]
async fn s1_session_reset_isolates_working_memory() {
    let dir = tempfile::tempdir().unwrap();
    let engine = boot(dir.path()).await;

    engine.facade.session_start().await;
    engine
        .facade
        .memory_store(
            "I am testing the alpha build of the memory engine today.",
            MemoryKind::Event,
            1.0,
            &[],
        )
        .await;
    engine.facade.session_start().await;

    let reply = engine
        .facade
        .memory_retrieve("alpha build", None, RetrieveFilters::default())
        .await;
    assert_eq!(reply, "No relevant memories found for this query.");
}

#[tokio::test]
async fn s6_too_short_content_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let engine = boot(dir.path()).await;
    engine.facade.session_start().await;

    let reply = engine.facade.memory_store("too short", MemoryKind::Event, 1.0, &[]).await;
    assert!(reply.contains("REJECTED"));
    assert!(reply.contains("too short"));

    let status = engine.facade.memory_status();
    assert!(status.contains("tier0: 0 entries"));
}

#[tokio::test]
async fn s2_fact_graph_serializes_without_confidence_tag() {
    let dir = tempfile::tempdir().unwrap();
    let engine = boot(dir.path()).await;
    engine.facade.session_start().await;

    let reply = engine
        .facade
        .memory_store("User lives in Paris.", MemoryKind::Fact, 1.0, &["User".into(), "Paris".into()])
        .await;
    assert!(reply.contains("entities: User, Paris"));
    assert!(reply.contains("facts: 1"));

    let graph_reply = engine.facade.graph_query("User", None, 1);
    assert_eq!(graph_reply, "Entity: User (unknown)\n  → located_in → Paris");
}

#[tokio::test]
async fn s3_supersession_updates_active_edge_and_halves_old_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let engine = boot(dir.path()).await;
    engine.facade.session_start().await;

    engine
        .facade
        .memory_store("User lives in Paris.", MemoryKind::Fact, 1.0, &["User".into(), "Paris".into()])
        .await;
    engine
        .facade
        .memory_store("User lives in London.", MemoryKind::Fact, 1.0, &["User".into(), "London".into()])
        .await;

    let graph_reply = engine.facade.graph_query("User", None, 1);
    assert_eq!(graph_reply, "Entity: User (unknown)\n  → located_in → London");
}

#[tokio::test]
async fn s5_correct_replaces_content_and_recounts_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.session.auto_start_on_boot = false;
    config.assembler = AssemblerConfig { mode: AssemblerMode::CrossSession };
    let engine = Engine::boot(config).await.unwrap();
    engine.facade.session_start().await;

    let store_reply = engine
        .facade
        .memory_store(
            "User likes dark mode (placeholder) quite a bit honestly.",
            MemoryKind::Preference,
            1.0,
            &["dark mode".into()],
        )
        .await;
    let memory_id = store_reply
        .split_whitespace()
        .nth(2)
        .expect("reply contains the memory id")
        .to_string();

    let forget_reply = engine
        .facade
        .memory_forget(
            &memory_id,
            "correct",
            Some("User strongly prefers dark mode with #0a0e27 base and #6c63ff accents."),
        )
        .await;
    assert!(forget_reply.contains("corrected"));

    let retrieve_reply = engine
        .facade
        .memory_retrieve("dark mode", None, RetrieveFilters::default())
        .await;
    assert!(retrieve_reply.contains("#0a0e27"));
}

#[tokio::test]
async fn s4_auto_compress_leaves_oldest_half_consolidated() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.session.auto_start_on_boot = false;
    config.compression = CompressionConfig {
        tier0_overflow_threshold: 50,
        tier1_consolidation_count: 10,
    };
    let engine = Engine::boot(config).await.unwrap();
    engine.facade.session_start().await;

    for _ in 0..6 {
        engine
            .facade
            .memory_store("one two three four five six seven eight nine ten.", MemoryKind::Event, 1.0, &[])
            .await;
    }

    let status = engine.facade.memory_status();
    assert!(status.contains("tier1: 1 entries"));
}
