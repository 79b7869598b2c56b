//! Translation cache: deduplicates extracted text across pipeline cycles
//! so that recognizer jitter between consecutive captures of the same
//! on-screen text does not trigger a new translation call every cycle.

use crate::translate::Translator;
use anyhow::Result;
use std::collections::VecDeque;
use std::time::Instant;

/// Similarity at or above which two texts are considered the same
/// on-screen string (absorbs single-frame OCR noise).
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Recent entries retained. More than one smooths flicker when inplace
/// mode alternates between a handful of region strings.
pub const DEFAULT_CAPACITY: usize = 4;

struct CacheEntry {
    key: String,
    translation: String,
    last_seen: Instant,
}

pub struct TranslationCache {
    /// Front entry is the current one driving the displayed subtitle.
    entries: VecDeque<CacheEntry>,
    capacity: usize,
    similarity_threshold: f64,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl TranslationCache {
    pub fn new(capacity: usize, similarity_threshold: f64) -> Self {
        assert!(capacity >= 1, "cache capacity must be at least 1");
        assert!(
            (0.0..=1.0).contains(&similarity_threshold),
            "similarity threshold {} outside [0.0, 1.0]",
            similarity_threshold
        );
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            similarity_threshold,
        }
    }

    /// Returns `(translation, cache_hit)`. Empty input clears the overlay
    /// and is never a cache lookup. On a miss the translator is invoked
    /// from the caller's thread; if it fails the cache is left unchanged.
    pub fn resolve(&mut self, text: &str, translator: &dyn Translator) -> Result<(String, bool)> {
        if text.is_empty() {
            return Ok((String::new(), false));
        }

        if let Some(idx) = self.find_match(text) {
            let mut entry = self.entries.remove(idx).unwrap();
            entry.last_seen = Instant::now();
            let translation = entry.translation.clone();
            self.entries.push_front(entry);
            return Ok((translation, true));
        }

        let translation = translator.translate(text)?;
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(CacheEntry {
            key: text.to_string(),
            translation: translation.clone(),
            last_seen: Instant::now(),
        });
        Ok((translation, false))
    }

    /// Grows the retention window to at least `capacity`. Inplace cycles
    /// call this with the current frame's region count so a static scene
    /// with many regions does not evict its own entries between cycles.
    /// Never shrinks.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
        }
    }

    /// Key of the entry currently driving the displayed subtitle.
    pub fn current_key(&self) -> Option<&str> {
        self.entries.front().map(|e| e.key.as_str())
    }

    /// Time since the current entry was last confirmed on screen.
    pub fn current_age(&self) -> Option<std::time::Duration> {
        self.entries.front().map(|e| e.last_seen.elapsed())
    }

    fn find_match(&self, text: &str) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.key == text || text_similarity(&entry.key, text) >= self.similarity_threshold
        })
    }
}

/// Normalized similarity in [0.0, 1.0]: 1 − edit distance / longer length.
/// Two empty strings are identical.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTranslator {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl CountingTranslator {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail: false,
                },
                calls,
            )
        }

        fn failing() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }
    }

    impl Translator for CountingTranslator {
        fn translate(&self, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("backend down"));
            }
            Ok(format!("<{}>", text))
        }
    }

    #[test]
    fn empty_text_clears_without_lookup() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::default();
        let (translation, hit) = cache.resolve("", &translator).unwrap();
        assert_eq!(translation, "");
        assert!(!hit);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(cache.current_key().is_none());
    }

    #[test]
    fn repeated_text_translates_at_most_once() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::default();

        let (first, hit1) = cache.resolve("こんにちは", &translator).unwrap();
        let (second, hit2) = cache.resolve("こんにちは", &translator).unwrap();

        assert_eq!(first, "<こんにちは>");
        assert_eq!(second, first);
        assert!(!hit1);
        assert!(hit2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn near_duplicate_is_a_fuzzy_hit() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::default();

        // One substitution in a 20-char string: similarity 0.95.
        cache.resolve("the quick brown foxx", &translator).unwrap();
        let (translation, hit) = cache.resolve("the quick brown foxy", &translator).unwrap();

        assert!(hit);
        assert_eq!(translation, "<the quick brown foxx>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dissimilar_text_misses_and_replaces_current() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::default();

        cache.resolve("hello there", &translator).unwrap();
        let (translation, hit) = cache.resolve("completely different", &translator).unwrap();

        assert!(!hit);
        assert_eq!(translation, "<completely different>");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.current_key(), Some("completely different"));
    }

    #[test]
    fn translator_failure_leaves_cache_unchanged() {
        let (ok_translator, _) = CountingTranslator::new();
        let mut cache = TranslationCache::default();
        cache.resolve("stable text", &ok_translator).unwrap();

        let err = cache.resolve("brand new text", &CountingTranslator::failing());
        assert!(err.is_err());
        assert_eq!(cache.current_key(), Some("stable text"));
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::new(2, DEFAULT_SIMILARITY_THRESHOLD);

        cache.resolve("alpha alpha alpha", &translator).unwrap();
        cache.resolve("bravo bravo bravo", &translator).unwrap();
        cache.resolve("charlie charlie x", &translator).unwrap();

        // "alpha" was evicted, so it costs a fourth call.
        cache.resolve("alpha alpha alpha", &translator).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn capacity_grows_to_fit_a_larger_working_set() {
        let (translator, calls) = CountingTranslator::new();
        let mut cache = TranslationCache::new(2, DEFAULT_SIMILARITY_THRESHOLD);
        cache.ensure_capacity(3);

        cache.resolve("alpha alpha alpha", &translator).unwrap();
        cache.resolve("bravo bravo bravo", &translator).unwrap();
        cache.resolve("charlie charlie x", &translator).unwrap();
        // All three fit now, so revisiting them is hits only.
        cache.resolve("alpha alpha alpha", &translator).unwrap();
        cache.resolve("bravo bravo bravo", &translator).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Smaller requests never shrink the window.
        cache.ensure_capacity(1);
        cache.resolve("charlie charlie x", &translator).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn hit_promotes_entry_to_current() {
        let (translator, _) = CountingTranslator::new();
        let mut cache = TranslationCache::new(2, DEFAULT_SIMILARITY_THRESHOLD);

        cache.resolve("first entry text", &translator).unwrap();
        cache.resolve("second entry text 9", &translator).unwrap();
        cache.resolve("first entry text", &translator).unwrap();

        assert_eq!(cache.current_key(), Some("first entry text"));
    }

    #[test]
    fn similarity_of_identical_strings_is_one() {
        assert_eq!(text_similarity("abc", "abc"), 1.0);
        assert_eq!(text_similarity("", ""), 1.0);
    }

    #[test]
    fn similarity_of_disjoint_strings_is_zero() {
        assert_eq!(text_similarity("aaaa", "bbbb"), 0.0);
    }

    #[test]
    fn similarity_counts_multibyte_chars_not_bytes() {
        // One substitution among five characters.
        let s = text_similarity("こんにちは", "こんにちわ");
        assert!((s - 0.8).abs() < 1e-9);
    }
}
