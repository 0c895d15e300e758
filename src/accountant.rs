//! Token Accountant — pure, deterministic token counting and truncation
//!
//! The reference implementation counts tokens with a GPT-4-compatible BPE;
//! any deterministic tokenization is acceptable as long as it is used
//! consistently everywhere the engine counts tokens. This implementation
//! uses a regex-based word/punctuation tokenizer so the crate needs no
//! external vocabulary file, while still producing stable per-token spans
//! that `truncate` can prefix-slice on.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9]+(?:'[A-Za-z0-9]+)*|[^\sA-Za-z0-9]").expect("static token regex")
});

/// Pure, stateless token counting and budget-aware truncation
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenAccountant;

impl TokenAccountant {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Number of tokens under the fixed tokenization
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        TOKEN_RE.find_iter(text).count()
    }

    /// Longest prefix of `text` whose token count is ≤ `budget`, and that count.
    ///
    /// May return fewer than `budget` tokens if the tokenizer does not split
    /// exactly at `budget` tokens worth of characters — it never returns more.
    #[must_use]
    pub fn truncate(&self, text: &str, budget: usize) -> (String, usize) {
        if budget == 0 {
            return (String::new(), 0);
        }
        let mut end = 0;
        let mut n = 0;
        for m in TOKEN_RE.find_iter(text) {
            if n >= budget {
                break;
            }
            end = m.end();
            n += 1;
        }
        (text[..end].to_string(), n)
    }

    /// Cheap character-based lower-envelope, never written to a row
    #[must_use]
    pub fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_and_punctuation() {
        let acc = TokenAccountant::new();
        assert_eq!(acc.count("hello world"), 2);
        assert_eq!(acc.count("hello, world!"), 4);
        assert_eq!(acc.count(""), 0);
    }

    #[test]
    fn truncate_never_exceeds_budget() {
        let acc = TokenAccountant::new();
        let text = "one two three four five six seven eight nine ten";
        let (prefix, n) = acc.truncate(text, 3);
        assert_eq!(n, 3);
        assert_eq!(acc.count(&prefix), 3);
        assert!(text.starts_with(&prefix));
    }

    #[test]
    fn truncate_budget_larger_than_text_returns_all() {
        let acc = TokenAccountant::new();
        let text = "short text";
        let (prefix, n) = acc.truncate(text, 100);
        assert_eq!(prefix, text);
        assert_eq!(n, acc.count(text));
    }

    #[test]
    fn estimate_is_len_over_four_rounded_up() {
        let acc = TokenAccountant::new();
        assert_eq!(acc.estimate("abcd"), 1);
        assert_eq!(acc.estimate("abcde"), 2);
        assert_eq!(acc.estimate(""), 0);
    }
}
