//! Context Assembler — candidate gathering, composite scoring, dedup,
//! budget-fill and fixed-order formatting
//!
//! Two retrieval behaviors exist side by side: strict session isolation
//! (Mode A, the compiled default) and six-source cross-session fusion
//! (Mode B), selected by [`crate::config::AssemblerMode`]. Both are fully
//! implemented; only one runs per configured engine.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::accountant::TokenAccountant;
use crate::config::{AssemblerMode, RankingConfig, TokenBudgetsConfig};
use crate::embedder::cached::CachedEmbedder;
use crate::error::Result;
use crate::graph::KnowledgeGraph;
use crate::manager::MemoryManager;
use crate::session::SessionRegistry;
use crate::store::DurableStore;
use crate::types::Summary;
use crate::vector::{VectorFilter, VectorStore};

const SIM_FLOOR: f64 = 0.3;

static CAP_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][a-z]*(?:\s[A-Z][a-z]*)*").expect("static capitalized-word regex"));
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("static quoted-substring regex"));

static STOPWORDS: &[&str] = &[
    "I", "The", "A", "An", "This", "That", "These", "Those", "It", "He", "She", "They", "We", "You",
    "What", "Who", "When", "Where", "Why", "How", "Is", "Are", "Was", "Were", "Do", "Does", "Did",
];

/// A scored, budgetable fragment of retrieval output
#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    token_count: usize,
    sim: f64,
    rec: f64,
    pri: f64,
    freq: f64,
    score: f64,
    source_tag: &'static str,
    access_id: Option<String>,
}

/// Optional filters passed through to the Vector Store / tier scans
#[derive(Debug, Clone, Default)]
pub struct RetrieveFilters {
    pub memory_types: Vec<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
}

/// Full `memory_retrieve` payload
#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub text: String,
    pub total_tokens: usize,
    pub budget_used: usize,
    pub budget_remaining: usize,
    pub source_counts: Vec<(&'static str, usize)>,
    pub candidates_considered: usize,
    pub candidates_selected: usize,
    pub session_id: Option<String>,
}

pub struct ContextAssembler {
    store: Arc<DurableStore>,
    vector: Arc<VectorStore>,
    graph: Arc<KnowledgeGraph>,
    sessions: Arc<SessionRegistry>,
    manager: Arc<MemoryManager>,
    embedder: Arc<CachedEmbedder>,
    accountant: TokenAccountant,
    budgets: TokenBudgetsConfig,
    ranking: RankingConfig,
    mode: AssemblerMode,
}

impl ContextAssembler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DurableStore>,
        vector: Arc<VectorStore>,
        graph: Arc<KnowledgeGraph>,
        sessions: Arc<SessionRegistry>,
        manager: Arc<MemoryManager>,
        embedder: Arc<CachedEmbedder>,
        budgets: TokenBudgetsConfig,
        ranking: RankingConfig,
        mode: AssemblerMode,
    ) -> Self {
        Self {
            store,
            vector,
            graph,
            sessions,
            manager,
            embedder,
            accountant: TokenAccountant::new(),
            budgets,
            ranking,
            mode,
        }
    }

    fn priority_for(tag: &str) -> f64 {
        match tag {
            "core" => 1.0,
            "working" => 0.95,
            "current_session" => 0.9,
            "graph" => 0.8,
            "long_term" => 0.65,
            "past_sessions" => 0.5,
            "vector" => 0.4,
            _ => 0.3,
        }
    }

    fn recency(created_at: DateTime<Utc>) -> f64 {
        let age_hours = (Utc::now() - created_at).num_seconds() as f64 / 3600.0;
        (-age_hours.max(0.0) / 168.0).exp().clamp(0.0, 1.0)
    }

    fn frequency(&self, id: &str) -> f64 {
        self.store.access_count(id).unwrap_or(0) as f64 / 10.0
    }

    fn score(&self, c: &Candidate) -> f64 {
        self.ranking.semantic_weight * c.sim
            + self.ranking.recency_weight * c.rec
            + self.ranking.priority_weight * c.pri
            + self.ranking.frequency_weight * c.freq
    }

    async fn retrieve_mode_a(&self, session_id: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        let working = self.manager.working_entries_for(session_id);
        if !working.is_empty() {
            let text = working.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
            let token_count = self.accountant.count(&text);
            let mut c = Candidate {
                text,
                token_count,
                sim: 0.6,
                rec: 1.0,
                pri: Self::priority_for("working"),
                freq: 1.0,
                score: 0.0,
                source_tag: "working",
                access_id: None,
            };
            c.score = self.score(&c);
            candidates.push(c);
        }

        if let Ok(tier1) = self.store.summaries_by_tier_and_session(1, session_id) {
            for s in tier1.into_iter().take(5) {
                candidates.push(self.candidate_from_summary(&s, "current_session", 0.6));
            }
        }

        candidates
    }

    fn candidate_from_summary(&self, s: &Summary, tag: &'static str, sim: f64) -> Candidate {
        let rec = Self::recency(s.created_at);
        let freq = self.frequency(&s.id);
        let mut c = Candidate {
            text: s.content.clone(),
            token_count: s.token_count,
            sim,
            rec,
            pri: Self::priority_for(tag),
            freq,
            score: 0.0,
            source_tag: tag,
            access_id: Some(s.id.clone()),
        };
        c.score = self.score(&c);
        c
    }

    fn extract_mentions(query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for m in CAP_WORD_RE.find_iter(query) {
            let word = m.as_str();
            if STOPWORDS.contains(&word) {
                continue;
            }
            if seen.insert(word.to_string()) {
                out.push(word.to_string());
            }
        }
        for cap in QUOTED_RE.captures_iter(query) {
            let word = cap[1].to_string();
            if seen.insert(word.clone()) {
                out.push(word);
            }
        }
        out.truncate(5);
        out
    }

    async fn graph_candidate(&self, query: &str) -> Option<Candidate> {
        let mentions = Self::extract_mentions(query);
        if mentions.is_empty() {
            return None;
        }
        let mut blocks = Vec::new();
        for mention in mentions {
            match self.graph.query_entity(&mention, 2) {
                Ok(Some(result)) => {
                    if let Err(e) = self.store.log_access(&result.root.id, "entity") {
                        warn!("access log failed for entity {}: {e}", result.root.id);
                    }
                    blocks.push(result.text);
                }
                Ok(None) => {}
                Err(e) => warn!("graph lookup failed for mention {mention:?}: {e}"),
            }
        }
        if blocks.is_empty() {
            return None;
        }
        let text = blocks.join("\n");
        let token_count = self.accountant.count(&text);
        let mut c = Candidate {
            text,
            token_count,
            sim: 0.7,
            rec: 1.0,
            pri: Self::priority_for("graph"),
            freq: 0.5,
            score: 0.0,
            source_tag: "graph",
            access_id: None,
        };
        c.score = self.score(&c);
        Some(c)
    }

    async fn retrieve_mode_b(&self, session_id: &str, query: &str, filters: &RetrieveFilters) -> (Option<Candidate>, Vec<Candidate>) {
        let core_tier3 = self.store.summaries_by_tier(3).unwrap_or_default();
        let core_text = core_tier3.iter().map(|s| s.content.as_str()).collect::<Vec<_>>().join("\n");
        let (truncated_core, core_tokens) = self.accountant.truncate(&core_text, self.budgets.tier3_core);
        let core_candidate = if truncated_core.is_empty() {
            None
        } else {
            Some(Candidate {
                text: truncated_core,
                token_count: core_tokens,
                sim: 1.0,
                rec: 1.0,
                pri: Self::priority_for("core"),
                freq: 1.0,
                score: 1.0,
                source_tag: "core",
                access_id: None,
            })
        };

        let mut candidates = Vec::new();

        let working = self.manager.working_entries_for(session_id);
        if !working.is_empty() {
            let text = working.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
            let token_count = self.accountant.count(&text);
            let mut c = Candidate {
                text,
                token_count,
                sim: 0.6,
                rec: 1.0,
                pri: Self::priority_for("working"),
                freq: 1.0,
                score: 0.0,
                source_tag: "working",
                access_id: None,
            };
            c.score = self.score(&c);
            candidates.push(c);
        }

        let query_embedding = self.embedder.embed(query).await;
        let vector_filter = VectorFilter {
            source_types: filters.memory_types.clone(),
            session_id: None,
            after: filters.after,
            before: filters.before,
            min_confidence: filters.min_confidence,
        };
        match self.vector.search_by_embedding(&query_embedding, 20, &vector_filter) {
            Ok(hits) => {
                for hit in hits.into_iter().filter(|h| h.score >= SIM_FLOOR) {
                    let rec = Self::recency(hit.record.created_at);
                    let freq = self.frequency(&hit.record.id);
                    let mut c = Candidate {
                        text: hit.record.preview.clone(),
                        token_count: self.accountant.count(&hit.record.preview),
                        sim: hit.score,
                        rec,
                        pri: Self::priority_for("vector"),
                        freq,
                        score: 0.0,
                        source_tag: "vector",
                        access_id: Some(hit.record.id.clone()),
                    };
                    c.score = self.score(&c);
                    candidates.push(c);
                }
            }
            Err(e) => warn!("vector search failed, skipping vector stage: {e}"),
        }

        if let Some(c) = self.graph_candidate(query).await {
            candidates.push(c);
        }

        if let Ok(tier1) = self.store.summaries_by_tier_and_session(1, session_id) {
            for s in tier1.into_iter().take(5) {
                candidates.push(self.candidate_from_summary(&s, "current_session", 0.6));
            }
        }
        if let Ok(tier1) = self.store.summaries_by_tier(1) {
            for s in tier1
                .into_iter()
                .filter(|s| s.session_id.as_deref() != Some(session_id))
                .take(10)
            {
                candidates.push(self.candidate_from_summary(&s, "past_sessions", 0.5));
            }
        }
        if let Ok(tier2) = self.store.summaries_by_tier(2) {
            for s in tier2.into_iter().take(5) {
                candidates.push(self.candidate_from_summary(&s, "long_term", 0.4));
            }
        }

        (core_candidate, candidates)
    }

    fn jaccard(a: &str, b: &str) -> f64 {
        let tokens = |t: &str| -> HashSet<String> {
            t.to_lowercase()
                .split_whitespace()
                .filter(|w| w.len() > 2)
                .map(str::to_string)
                .collect()
        };
        let (sa, sb) = (tokens(a), tokens(b));
        if sa.is_empty() && sb.is_empty() {
            return 0.0;
        }
        let inter = sa.intersection(&sb).count();
        let union = sa.union(&sb).count();
        if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    fn dedup(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut kept: Vec<Candidate> = Vec::new();
        'outer: for c in candidates {
            for existing in &mut kept {
                if Self::jaccard(&c.text, &existing.text) >= self.ranking.dedup_similarity_threshold {
                    if c.score > existing.score {
                        *existing = c;
                    }
                    continue 'outer;
                }
            }
            kept.push(c);
        }
        kept
    }

    fn format_sections(mode: AssemblerMode, selected: &[Candidate]) -> String {
        let order: &[&str] = match mode {
            AssemblerMode::SessionIsolated => &["working", "current_session"],
            AssemblerMode::CrossSession => &["core", "working", "current_session", "graph", "long_term", "past_sessions", "vector"],
        };
        let labels = |tag: &str| match tag {
            "core" => "Core Memory",
            "working" => "Working Memory",
            "current_session" => "Current Session",
            "graph" => "Knowledge Graph",
            "long_term" => "Long-Term Memory",
            "past_sessions" => "Past Sessions",
            "vector" => "Related Memories",
            other => other,
        };
        let mut sections = Vec::new();
        for tag in order {
            let lines: Vec<&str> = selected.iter().filter(|c| &c.source_tag == tag).map(|c| c.text.as_str()).collect();
            if !lines.is_empty() {
                sections.push(format!("{}:\n{}", labels(tag), lines.join("\n")));
            }
        }
        sections.join("\n\n")
    }

    fn footer(session_id: Option<&str>, source_counts: &[(&str, usize)], used: usize, budget: usize) -> String {
        let id_display = session_id.map_or_else(|| "none".to_string(), |id| id.chars().take(8).collect());
        let sources = source_counts
            .iter()
            .map(|(tag, n)| format!("{tag}:{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("--- Session: {id_display} | Sources: {sources} | Tokens: {used}/{budget} ---")
    }

    /// `memory_retrieve(query, token_budget?, filters?)`
    pub async fn retrieve(&self, query: &str, token_budget: Option<usize>, filters: &RetrieveFilters) -> Result<AssembleResult> {
        let session_id = self.sessions.current_id();
        let budget = token_budget.unwrap_or(self.budgets.default_retrieve_budget);

        let (core, pool) = match self.mode {
            AssemblerMode::SessionIsolated => {
                let pool = match &session_id {
                    Some(sid) => self.retrieve_mode_a(sid).await,
                    None => Vec::new(),
                };
                (None, pool)
            }
            AssemblerMode::CrossSession => match &session_id {
                Some(sid) => self.retrieve_mode_b(sid, query, filters).await,
                None => (None, Vec::new()),
            },
        };

        let candidates_considered = pool.len() + usize::from(core.is_some());

        let mut remaining = budget;
        let mut selected = Vec::new();
        let mut source_counts: Vec<(&'static str, usize)> = Vec::new();

        if let Some(core) = core {
            remaining = remaining.saturating_sub(core.token_count);
            bump(&mut source_counts, core.source_tag, 1);
            selected.push(core);
        }

        let deduped = self.dedup(pool);
        let mut sorted = deduped;
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        for c in sorted {
            if c.token_count <= remaining {
                remaining -= c.token_count;
                bump(&mut source_counts, c.source_tag, 1);
                if let Some(id) = &c.access_id {
                    let memory_type = c.source_tag;
                    if let Err(e) = self.store.log_access(id, memory_type) {
                        warn!("access log failed for {id}: {e}");
                    }
                }
                selected.push(c);
            }
        }

        let used = budget - remaining;
        let candidates_selected = selected.len();

        let text = if selected.is_empty() {
            "No relevant memories found for this query.".to_string()
        } else {
            format!(
                "{}\n\n{}",
                Self::format_sections(self.mode, &selected),
                Self::footer(session_id.as_deref(), &source_counts, used, budget)
            )
        };

        Ok(AssembleResult {
            total_tokens: used,
            budget_used: used,
            budget_remaining: remaining,
            source_counts,
            candidates_considered,
            candidates_selected,
            session_id,
            text,
        })
    }
}

fn bump(counts: &mut Vec<(&'static str, usize)>, tag: &'static str, by: usize) {
    if let Some(entry) = counts.iter_mut().find(|(t, _)| *t == tag) {
        entry.1 += by;
    } else {
        counts.push((tag, by));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_text_is_one() {
        assert!((ContextAssembler::jaccard("hello world today", "hello world today") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_disjoint_text_is_zero() {
        assert_eq!(ContextAssembler::jaccard("alpha beta gamma", "delta epsilon zeta"), 0.0);
    }

    #[test]
    fn extract_mentions_drops_stopwords_and_keeps_quoted() {
        let mentions = ContextAssembler::extract_mentions(r#"I asked Paris about "dark mode" settings"#);
        assert!(mentions.contains(&"Paris".to_string()));
        assert!(mentions.contains(&"dark mode".to_string()));
        assert!(!mentions.contains(&"I".to_string()));
    }

    #[test]
    fn priority_defaults_match_table() {
        assert!((ContextAssembler::priority_for("core") - 1.0).abs() < f64::EPSILON);
        assert!((ContextAssembler::priority_for("vector") - 0.4).abs() < f64::EPSILON);
        assert!((ContextAssembler::priority_for("unknown_tag") - 0.3).abs() < f64::EPSILON);
    }
}
