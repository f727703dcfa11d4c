//! Semantic (similarity-based) cache (C4).
//!
//! Text is normalized, bucketed by a short hash prefix, and indexed by its
//! n-gram set; lookup does a linear Jaccard-similarity scan within the
//! query's bucket. Keeping buckets narrow (spec §9: "scans are O(tens), not
//! O(thousands)") is the whole point of the bucket hash — it is a
//! performance optimization only, never part of the correctness contract.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::cache::lru::LruStore;

/// Normalization + indexing knobs, fixed at construction (spec §4.4).
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    /// Lowercase text before indexing.
    pub lowercase: bool,
    /// Collapse whitespace runs to a single space and trim.
    pub collapse_whitespace: bool,
    /// Strip ASCII punctuation before indexing.
    pub strip_punctuation: bool,
    /// N-gram length used for similarity.
    pub ngram_size: usize,
    /// Minimum Jaccard similarity for a hit.
    pub similarity_threshold: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            collapse_whitespace: true,
            strip_punctuation: false,
            ngram_size: 3,
            similarity_threshold: 0.85,
        }
    }
}

struct IndexedEntry {
    ngrams: HashSet<String>,
    backing_key: String,
    expires_at: Instant,
}

/// A normalized-text bucketing index with Jaccard-similarity lookup, backed
/// by an `LruStore` for the actual cached bytes.
pub struct SemanticIndex {
    config: SemanticConfig,
    buckets: RwLock<HashMap<String, Vec<IndexedEntry>>>,
    backing: std::sync::Arc<LruStore>,
    next_backing_id: AtomicU64,
}

impl SemanticIndex {
    /// Build an index over the given normalization/threshold config, backed
    /// by an existing `LruStore` for the cached bytes.
    pub fn new(config: SemanticConfig, backing: std::sync::Arc<LruStore>) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
            backing,
            next_backing_id: AtomicU64::new(0),
        }
    }

    fn normalize(&self, text: &str) -> String {
        let mut s = text.to_string();
        if self.config.lowercase {
            s = s.to_lowercase();
        }
        if self.config.strip_punctuation {
            s = s.chars().filter(|c| !c.is_ascii_punctuation()).collect();
        }
        if self.config.collapse_whitespace {
            s = s.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        s
    }

    fn ngrams(&self, normalized: &str) -> HashSet<String> {
        let n = self.config.ngram_size;
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() < n {
            let mut set = HashSet::new();
            if !normalized.is_empty() {
                set.insert(normalized.to_string());
            }
            return set;
        }
        (0..=chars.len() - n)
            .map(|i| chars[i..i + n].iter().collect::<String>())
            .collect()
    }

    fn bucket_id(&self, normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 8)
    }

    /// Jaccard similarity |A∩B| / |A∪B|. Symmetric; 1.0 for identical sets;
    /// 0.0 if either set is empty (P4).
    pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        intersection as f64 / union as f64
    }

    /// Look up the best similarity match for `prompt` within `model`'s
    /// bucket, scoped by prefixing the backing key with the model name so
    /// entries never leak across models.
    pub fn get(&self, model: &str, prompt: &str) -> Option<Vec<u8>> {
        let normalized = self.normalize(prompt);
        let query_ngrams = self.ngrams(&normalized);
        let bucket_key = format!("{model}:{}", self.bucket_id(&normalized));

        let buckets = self.buckets.read();
        let entries = buckets.get(&bucket_key)?;

        let now = Instant::now();
        let mut best: Option<(f64, &IndexedEntry)> = None;
        for entry in entries {
            if now > entry.expires_at {
                continue;
            }
            let sim = Self::jaccard(&query_ngrams, &entry.ngrams);
            match &best {
                Some((best_sim, _)) if *best_sim >= sim => {}
                _ => best = Some((sim, entry)),
            }
        }

        let (sim, entry) = best?;
        if sim >= self.config.similarity_threshold {
            self.backing.get(&entry.backing_key)
        } else {
            None
        }
    }

    /// Index `prompt` under `model` and store `value` in the backing LRU.
    /// A no-op on empty value so a bad write never poisons the index (spec
    /// §4.4 failure semantics).
    pub fn set(&self, model: &str, prompt: &str, value: Vec<u8>, ttl: Duration) {
        if value.is_empty() {
            return;
        }
        let normalized = self.normalize(prompt);
        let ngrams = self.ngrams(&normalized);
        let bucket_key = format!("{model}:{}", self.bucket_id(&normalized));

        // Drawn from a monotonic counter, not a bucket-length snapshot: two
        // concurrent `set`s for the same bucket must never land on the same
        // backing key and silently overwrite each other's bytes.
        let id = self.next_backing_id.fetch_add(1, Ordering::Relaxed);
        let backing_key = format!("semantic:{model}:{bucket_key}:{id}");

        self.backing.set(&backing_key, value, ttl);

        let mut buckets = self.buckets.write();
        buckets
            .entry(bucket_key)
            .or_default()
            .push(IndexedEntry {
                ngrams,
                backing_key,
                expires_at: Instant::now() + ttl,
            });
    }
}

fn hex_prefix(bytes: &[u8], hex_chars: usize) -> String {
    let needed_bytes = hex_chars.div_ceil(2);
    bytes[..needed_bytes.min(bytes.len())]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..hex_chars]
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SemanticIndex {
        SemanticIndex::new(SemanticConfig::default(), LruStore::new(1000, Duration::from_secs(300)))
    }

    #[test]
    fn exact_normalized_match_has_similarity_one() {
        let idx = index();
        idx.set("m", "Hello  world!", b"R1".to_vec(), Duration::from_secs(60));
        assert_eq!(idx.get("m", "hello world!"), Some(b"R1".to_vec()));
    }

    #[test]
    fn dissimilar_text_misses_below_threshold() {
        let idx = index();
        idx.set("m", "Hello world!", b"R1".to_vec(), Duration::from_secs(60));
        assert_eq!(idx.get("m", "completely different sentence here"), None);
    }

    #[test]
    fn jaccard_is_symmetric_and_reflexive() {
        let a: HashSet<String> = ["ab", "bc", "cd"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["bc", "cd", "de"].iter().map(|s| s.to_string()).collect();
        assert_eq!(SemanticIndex::jaccard(&a, &b), SemanticIndex::jaccard(&b, &a));
        assert_eq!(SemanticIndex::jaccard(&a, &a), 1.0);
        assert_eq!(SemanticIndex::jaccard(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn raising_threshold_never_increases_hit_rate() {
        let ngrams_a: HashSet<String> = ["hel", "ell", "llo"].iter().map(|s| s.to_string()).collect();
        let ngrams_b: HashSet<String> = ["hel", "elx", "lxo"].iter().map(|s| s.to_string()).collect();
        let sim = SemanticIndex::jaccard(&ngrams_a, &ngrams_b);

        let low = SemanticConfig {
            similarity_threshold: 0.0,
            ..Default::default()
        };
        let high = SemanticConfig {
            similarity_threshold: 1.0,
            ..Default::default()
        };

        assert!(sim >= low.similarity_threshold);
        assert!(sim < high.similarity_threshold || sim == 1.0);
    }

    #[test]
    fn set_with_empty_value_is_a_noop() {
        let idx = index();
        idx.set("m", "hello", Vec::new(), Duration::from_secs(60));
        assert_eq!(idx.get("m", "hello"), None);
    }

    proptest::proptest! {
        // P4: Jaccard similarity is symmetric and bounded to [0, 1] for any
        // pair of n-gram sets.
        #[test]
        fn jaccard_is_symmetric_and_bounded(
            a in proptest::collection::hash_set("[a-c]{1,3}", 0..10),
            b in proptest::collection::hash_set("[a-c]{1,3}", 0..10),
        ) {
            let sim_ab = SemanticIndex::jaccard(&a, &b);
            let sim_ba = SemanticIndex::jaccard(&b, &a);
            proptest::prop_assert_eq!(sim_ab, sim_ba);
            proptest::prop_assert!((0.0..=1.0).contains(&sim_ab));
        }
    }
}
