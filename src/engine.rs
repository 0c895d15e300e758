//! Engine — the single value the transport owns and passes to every handler
//!
//! Boots the Durable Store, Vector Store, Knowledge Graph, Session
//! Registry, Embedder, Memory Manager and Context Assembler from
//! [`Config`], then exposes the [`ToolFacade`] as the only thing handlers
//! call into. No thread-local or ambient state.

use std::sync::Arc;

use tracing::info;

use crate::assembler::ContextAssembler;
use crate::config::Config;
use crate::embedder::cached::CachedEmbedder;
use crate::embedder::{make_provider, Embedder};
use crate::error::Result;
use crate::facade::ToolFacade;
use crate::graph::KnowledgeGraph;
use crate::manager::MemoryManager;
use crate::session::SessionRegistry;
use crate::store::DurableStore;
use crate::vector::VectorStore;

pub struct Engine {
    pub facade: ToolFacade,
    pub sessions: Arc<SessionRegistry>,
    store: Arc<DurableStore>,
    config: Config,
}

impl Engine {
    /// Open the durable store, construct every component, and optionally
    /// auto-start a session per `session.autoStartOnBoot`.
    pub async fn boot(config: Config) -> Result<Self> {
        info!(data_dir = %config.storage.data_dir.display(), "booting engine");
        let store = Arc::new(DurableStore::open(&config.storage.data_dir, &config.storage.sqlite_file).await?);
        let vector = Arc::new(VectorStore::new(store.clone()));
        let graph = Arc::new(KnowledgeGraph::new(store.clone()));
        let sessions = Arc::new(SessionRegistry::new(store.clone()));

        let embedding_cfg = config.embedding.clone();
        let cache_capacity = embedding_cfg.cache_capacity;
        let raw_embedder = Arc::new(Embedder::new(embedding_cfg.dimensions, move || {
            make_provider(&embedding_cfg.provider, embedding_cfg.dimensions, &embedding_cfg.model)
        }));
        let embedder = Arc::new(CachedEmbedder::new(raw_embedder, cache_capacity));

        let manager = Arc::new(MemoryManager::new(
            store.clone(),
            vector.clone(),
            graph.clone(),
            sessions.clone(),
            embedder.clone(),
            config.token_budgets,
            config.compression,
        ));

        let assembler = Arc::new(ContextAssembler::new(
            store.clone(),
            vector,
            graph.clone(),
            sessions.clone(),
            manager.clone(),
            embedder,
            config.token_budgets,
            config.ranking,
            config.assembler.mode,
        ));

        let facade = ToolFacade::new(manager, assembler, sessions.clone(), graph);

        if config.session.auto_start_on_boot {
            let reply = facade.session_start().await;
            info!(reply, "auto-started session on boot");
        }

        Ok(Self {
            facade,
            sessions,
            store,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Finish the in-flight handler, flush the store synchronously, end the
    /// current session, release the embedder.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down engine");
        self.sessions.end_current()?;
        self.store.close().await
    }
}
