//! Session Registry — process-wide single active session
//!
//! `none → active → ended/replaced`. Exclusively owns the current session
//! id; everything else treats the registry as the source of truth for
//! "which session am I in right now."

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::store::DurableStore;
use crate::types::{generate_session_id, Session};

/// A best-effort hook invoked with the outgoing session id, returning an
/// optional archive summary. Boxed (rather than generic) so callers can
/// pass `None` without turbofish.
pub type ArchiveHook = Box<dyn FnOnce(String) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send>;

/// Result of `start`
#[derive(Debug, Clone)]
pub struct StartResult {
    pub new_id: String,
    pub started_at: DateTime<Utc>,
    pub previous_id: Option<String>,
    pub archived: bool,
    pub archive_summary: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct State {
    current_id: Option<String>,
}

pub struct SessionRegistry {
    store: Arc<DurableStore>,
    state: RwLock<State>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            state: RwLock::new(State::default()),
        }
    }

    /// O(1) current session id, or `None` if no session is active.
    #[must_use]
    pub fn current_id(&self) -> Option<String> {
        self.state.read().current_id.clone()
    }

    /// Archive the outgoing session (best-effort via `archive_hook`), end
    /// it, then mint and activate a fresh session.
    pub async fn start(&self, archive_hook: Option<ArchiveHook>) -> Result<StartResult> {
        let previous_id = self.current_id();
        let mut archived = false;
        let mut archive_summary = None;

        if let Some(prev) = &previous_id {
            if let Some(hook) = archive_hook {
                archive_summary = hook(prev.clone()).await;
                archived = archive_summary.is_some();
            }
            if let Err(e) = self.store.end_session_row(prev, Utc::now()) {
                warn!("failed to mark session {prev} ended: {e}");
            }
        }

        let new_id = generate_session_id();
        let started_at = Utc::now();
        let row = Session {
            id: new_id.clone(),
            started_at,
            ended_at: None,
            metadata: json!({ "previous_session_id": previous_id }),
        };
        self.store.insert_session(&row)?;
        self.state.write().current_id = Some(new_id.clone());

        Ok(StartResult {
            new_id,
            started_at,
            previous_id,
            archived,
            archive_summary,
        })
    }

    /// Mark the active session ended and clear in-process state.
    pub fn end_current(&self) -> Result<()> {
        if let Some(id) = self.state.write().current_id.take() {
            self.store.end_session_row(&id, Utc::now())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_without_prior_session_has_no_previous_id() {
        let (store, _dir) = DurableStore::open_temp().await.unwrap();
        let registry = SessionRegistry::new(Arc::new(store));
        let result = registry.start(None).await.unwrap();
        assert!(result.previous_id.is_none());
        assert!(!result.archived);
        assert_eq!(registry.current_id(), Some(result.new_id));
    }

    #[tokio::test]
    async fn second_start_replaces_first_and_reports_previous() {
        let (store, _dir) = DurableStore::open_temp().await.unwrap();
        let registry = SessionRegistry::new(Arc::new(store));
        let first = registry.start(None).await.unwrap();
        let second = registry.start(None).await.unwrap();
        assert_eq!(second.previous_id, Some(first.new_id.clone()));
        assert_ne!(second.new_id, first.new_id);
        assert_eq!(registry.current_id(), Some(second.new_id));
    }

    #[tokio::test]
    async fn end_current_clears_state() {
        let (store, _dir) = DurableStore::open_temp().await.unwrap();
        let registry = SessionRegistry::new(Arc::new(store));
        registry.start(None).await.unwrap();
        registry.end_current().unwrap();
        assert!(registry.current_id().is_none());
    }
}
