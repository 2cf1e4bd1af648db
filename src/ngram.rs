//! Whitespace n-grams, per-document diversity and corpus n-gram entropy
//!
//! Tokens are runs of non-whitespace characters; nothing is lowercased or
//! stripped. An n-gram's identity is its tokens joined with single spaces.
//!
//! Two different questions are answered here and kept apart:
//! - [`per_document_unique_count`]: how many distinct n-grams one text uses
//!   (duplicates collapse inside the document)
//! - [`accumulate_corpus_counts`] + [`corpus_entropy`]: how concentrated the
//!   mass is over every n-gram ever produced (counts add across documents)

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Unicode whitespace, plus the ASCII information separators U+001C..U+001F
fn is_separator(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Split text into whitespace tokens
pub fn tokens(text: &str) -> Vec<&str> {
    text.split(is_separator).filter(|t| !t.is_empty()).collect()
}

/// N-gram keys of a text, in order.
///
/// Returns `max(0, tokens - n + 1)` keys; empty when the text is shorter
/// than `n` tokens or `n == 0`.
pub fn ngrams(text: &str, n: usize) -> Vec<String> {
    let toks = tokens(text);
    ngrams_from_tokens(&toks, n)
}

fn ngrams_from_tokens(toks: &[&str], n: usize) -> Vec<String> {
    if n == 0 || toks.len() < n {
        return Vec::new();
    }
    toks.windows(n).map(|w| w.join(" ")).collect()
}

/// Number of distinct n-grams in one text (0 if shorter than `n` tokens)
pub fn per_document_unique_count(text: &str, n: usize) -> usize {
    let toks = tokens(text);
    if n == 0 || toks.len() < n {
        return 0;
    }
    toks.windows(n).collect::<HashSet<_>>().len()
}

/// Occurrence counts of n-gram keys for a fixed order `n`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NgramCounter {
    n: usize,
    counts: HashMap<String, u64>,
}

impl NgramCounter {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            counts: HashMap::new(),
        }
    }

    /// N-gram order
    pub fn n(&self) -> usize {
        self.n
    }

    /// Add every n-gram occurrence of `text`
    pub fn add_text(&mut self, text: &str) {
        for key in ngrams(text, self.n) {
            *self.counts.entry(key).or_insert(0) += 1;
        }
    }

    /// Sum another counter into this one, key by key.
    ///
    /// Merging partitions in any order gives the same counts as a single pass.
    pub fn merge(&mut self, other: &NgramCounter) {
        debug_assert_eq!(self.n, other.n, "merging counters of different order");
        for (key, &count) in &other.counts {
            *self.counts.entry(key.clone()).or_insert(0) += count;
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total occurrences across all keys
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Keys and their counts, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, &c)| (k.as_str(), c))
    }

    /// The `k` most frequent keys, ties broken alphabetically
    pub fn most_common(&self, k: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> =
            self.iter().map(|(k, c)| (k.to_string(), c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(k);
        entries
    }
}

/// Merge the n-gram counts of every text into one counter
pub fn accumulate_corpus_counts<I, S>(texts: I, n: usize) -> NgramCounter
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counter = NgramCounter::new(n);
    for text in texts {
        counter.add_text(text.as_ref());
    }
    counter
}

/// Shannon entropy of an n-gram frequency distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntropyStats {
    /// Entropy in bits
    pub entropy: f64,
    /// `log2(unique_ngrams)`, the entropy of a uniform distribution
    pub max_entropy: f64,
    /// `entropy / max_entropy`, 0 when `max_entropy` is 0
    pub normalized_entropy: f64,
    /// Number of distinct keys
    pub unique_ngrams: usize,
}

/// Entropy statistics of a counter. An empty counter yields all zeros.
pub fn corpus_entropy(counter: &NgramCounter) -> CorpusEntropyStats {
    let unique = counter.len();
    let total = counter.total();
    if unique == 0 || total == 0 {
        return CorpusEntropyStats::default();
    }

    let total = total as f64;
    let entropy = -counter
        .iter()
        .map(|(_, c)| {
            let p = c as f64 / total;
            p * p.log2()
        })
        .sum::<f64>();
    let entropy = entropy.max(0.0);

    let max_entropy = (unique as f64).log2();
    let normalized_entropy = if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    };

    CorpusEntropyStats {
        entropy,
        max_entropy,
        normalized_entropy,
        unique_ngrams: unique,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ngrams() {
        assert_eq!(ngrams("a b c", 2), vec!["a b", "b c"]);
        assert!(ngrams("a", 2).is_empty());
        assert!(ngrams("", 1).is_empty());
        assert!(ngrams("a b", 0).is_empty());
    }

    #[test]
    fn test_ngrams_collapse_whitespace_runs() {
        assert_eq!(ngrams("  a\t\tb \n c ", 2), vec!["a b", "b c"]);
        // punctuation and case are part of the token
        assert_eq!(ngrams("The the, THE", 1), vec!["The", "the,", "THE"]);
    }

    #[test]
    fn test_information_separators_split_tokens() {
        assert_eq!(tokens("a\u{1c}b\u{1d}c\u{1e}d\u{1f}e"), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(ngrams("x\u{1f}\u{1f}y", 2), vec!["x y"]);
        // other control characters stay inside the token
        assert_eq!(tokens("a\u{1b}b"), vec!["a\u{1b}b"]);
    }

    #[test]
    fn test_per_document_unique_count() {
        assert_eq!(per_document_unique_count("a a a", 1), 1);
        assert_eq!(per_document_unique_count("a b a", 2), 2);
        assert_eq!(per_document_unique_count("a b", 3), 0);
        assert_eq!(per_document_unique_count("", 1), 0);
    }

    #[test]
    fn test_accumulate_is_additive_across_documents() {
        let counter = accumulate_corpus_counts(["a a", "b b"], 1);
        assert_eq!(counter.get("a"), 2);
        assert_eq!(counter.get("b"), 2);
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_uniform_corpus_entropy() {
        let stats = corpus_entropy(&accumulate_corpus_counts(["a a", "b b"], 1));
        assert!((stats.entropy - 1.0).abs() < 1e-12);
        assert!((stats.max_entropy - 1.0).abs() < 1e-12);
        assert!((stats.normalized_entropy - 1.0).abs() < 1e-12);
        assert_eq!(stats.unique_ngrams, 2);
    }

    #[test]
    fn test_single_key_corpus_entropy() {
        let counter = accumulate_corpus_counts(["a a a"], 1);
        assert_eq!(counter.get("a"), 3);
        let stats = corpus_entropy(&counter);
        assert_eq!(stats.entropy, 0.0);
        assert_eq!(stats.max_entropy, 0.0);
        assert_eq!(stats.normalized_entropy, 0.0);
    }

    #[test]
    fn test_empty_counter_entropy() {
        let stats = corpus_entropy(&NgramCounter::new(3));
        assert_eq!(stats, CorpusEntropyStats::default());
    }

    #[test]
    fn test_normalized_entropy_bounds() {
        let counter = accumulate_corpus_counts(["a a a b", "c a b"], 1);
        let stats = corpus_entropy(&counter);
        assert!(stats.normalized_entropy > 0.0);
        assert!(stats.normalized_entropy < 1.0);
        assert!(stats.entropy <= stats.max_entropy);
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let docs = [
            "the cat sat on the mat",
            "the dog sat on the log",
            "a cat and a dog",
            "on the mat the cat sat",
        ];

        for n in 1..=3 {
            let whole = accumulate_corpus_counts(docs, n);

            let left = accumulate_corpus_counts(&docs[..1], n);
            let right = accumulate_corpus_counts(&docs[1..], n);

            let mut merged = right.clone();
            merged.merge(&left);
            assert_eq!(merged, whole);

            let mut merged_other_way = left.clone();
            merged_other_way.merge(&right);
            assert_eq!(merged_other_way, whole);
        }
    }

    #[test]
    fn test_iter_covers_every_key() {
        let counter = accumulate_corpus_counts(["x y x", "z"], 1);
        let mut entries: Vec<(&str, u64)> = counter.iter().collect();
        entries.sort_unstable();
        assert_eq!(entries, vec![("x", 2), ("y", 1), ("z", 1)]);
        assert_eq!(entries.iter().map(|(_, c)| c).sum::<u64>(), counter.total());
    }

    #[test]
    fn test_most_common_is_deterministic() {
        let counter = accumulate_corpus_counts(["b a b c a"], 1);
        assert_eq!(
            counter.most_common(2),
            vec![("a".to_string(), 2), ("b".to_string(), 2)]
        );
    }
}
