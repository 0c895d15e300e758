//! Prompt Templates — static strings the host asks for by name
//!
//! These are not rendered with any per-call data; the host selects one by
//! name and splices it into its own prompt assembly.

/// Look up a named template; `None` if the host asked for an unknown one.
#[must_use]
pub fn get(name: &str) -> Option<&'static str> {
    match name {
        "memory_usage_guidance" => Some(MEMORY_USAGE_GUIDANCE),
        "fact_extraction" => Some(FACT_EXTRACTION),
        "session_summary" => Some(SESSION_SUMMARY),
        _ => None,
    }
}

const MEMORY_USAGE_GUIDANCE: &str = "\
Use memory_store to save durable facts, preferences, and events worth recalling later. \
Use memory_retrieve before answering questions that may depend on prior context. \
Prefer full sentences over fragments; the engine rejects content under 10 words.";

const FACT_EXTRACTION: &str = "\
When storing a fact, name every entity the sentence concerns explicitly in the \
entities list, in subject-first order, so the engine can infer the right relation.";

const SESSION_SUMMARY: &str = "\
Summarize what was accomplished and decided this session in two or three \
sentences suitable for archival as a Tier-1 memory.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_template_resolves() {
        assert!(get("memory_usage_guidance").is_some());
    }

    #[test]
    fn unknown_template_is_none() {
        assert!(get("nonexistent").is_none());
    }
}
