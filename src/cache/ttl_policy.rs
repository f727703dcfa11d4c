//! Model-TTL policy (C7): per-model and pattern-based TTL/enablement
//! overrides.
//!
//! Lookup order is exact match, then pattern rules in insertion order, else
//! the default. `enabled=false` always wins over a default of `true` (spec
//! §4.7's composition rule), matching how `cache::ttl_policy` callers expect
//! "explicitly disabled" to be sticky.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;

use crate::config::CacheConfig;

struct PatternRule {
    regex: Regex,
    ttl_seconds: Option<u64>,
    enabled: Option<bool>,
    similarity_threshold: Option<f64>,
}

/// Converts a `*`/`?` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if regex_syntax::is_meta_character(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).expect("glob pattern always compiles to a valid regex")
}

struct ExactRule {
    ttl_seconds: Option<u64>,
    enabled: Option<bool>,
    similarity_threshold: Option<f64>,
}

/// Resolves the effective TTL, enablement, and similarity threshold for a
/// model name.
pub struct TtlPolicy {
    default_ttl: Duration,
    exact: HashMap<String, ExactRule>,
    patterns: Vec<PatternRule>,
}

impl TtlPolicy {
    /// Build a policy from the cache config's default TTL and per-model
    /// overrides (spec §6 `cache.models[]`).
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut exact = HashMap::new();
        let mut patterns = Vec::new();

        for rule in &config.models {
            match (&rule.model, &rule.pattern) {
                (Some(model), _) => {
                    exact.insert(
                        model.clone(),
                        ExactRule {
                            ttl_seconds: rule.ttl_seconds,
                            enabled: rule.enabled,
                            similarity_threshold: rule.similarity_threshold,
                        },
                    );
                }
                (None, Some(pattern)) => patterns.push(PatternRule {
                    regex: glob_to_regex(pattern),
                    ttl_seconds: rule.ttl_seconds,
                    enabled: rule.enabled,
                    similarity_threshold: rule.similarity_threshold,
                }),
                (None, None) => {}
            }
        }

        Self {
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            exact,
            patterns,
        }
    }

    /// TTL for a model: exact match, then first matching pattern, else the
    /// default.
    pub fn ttl_for(&self, model: &str) -> Duration {
        if let Some(rule) = self.exact.get(model) {
            if let Some(secs) = rule.ttl_seconds {
                return Duration::from_secs(secs);
            }
        }
        for rule in &self.patterns {
            if rule.regex.is_match(model) {
                if let Some(secs) = rule.ttl_seconds {
                    return Duration::from_secs(secs);
                }
                break;
            }
        }
        self.default_ttl
    }

    /// Whether caching is enabled for a model. `enabled=false` anywhere in
    /// the matching chain wins over a default `true` (spec §4.7).
    pub fn enabled_for(&self, model: &str) -> bool {
        if let Some(rule) = self.exact.get(model) {
            if let Some(enabled) = rule.enabled {
                return enabled;
            }
        }
        for rule in &self.patterns {
            if rule.regex.is_match(model) {
                if let Some(enabled) = rule.enabled {
                    return enabled;
                }
                break;
            }
        }
        true
    }

    /// Similarity threshold override for the semantic cache, if any.
    pub fn similarity_threshold_for(&self, model: &str) -> Option<f64> {
        if let Some(rule) = self.exact.get(model) {
            if rule.similarity_threshold.is_some() {
                return rule.similarity_threshold;
            }
        }
        for rule in &self.patterns {
            if rule.regex.is_match(model) {
                return rule.similarity_threshold;
            }
        }
        None
    }
}

/// Minimal glob-to-regex metacharacter escaping; avoids pulling in a second
/// regex-syntax crate dependency by hand-rolling the small set of
/// characters `regex::escape` would otherwise touch.
mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\'
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelCacheOverride;

    fn config_with(models: Vec<ModelCacheOverride>) -> CacheConfig {
        CacheConfig {
            models,
            ..Default::default()
        }
    }

    #[test]
    fn exact_beats_pattern_beats_default() {
        let config = config_with(vec![
            ModelCacheOverride {
                model: None,
                pattern: Some("gpt-*".into()),
                ttl_seconds: Some(100),
                enabled: None,
                max_entries: None,
                similarity_threshold: None,
            },
            ModelCacheOverride {
                model: Some("gpt-4".into()),
                pattern: None,
                ttl_seconds: Some(200),
                enabled: None,
                max_entries: None,
                similarity_threshold: None,
            },
        ]);
        let policy = TtlPolicy::from_config(&config);

        assert_eq!(policy.ttl_for("gpt-4"), Duration::from_secs(200));
        assert_eq!(policy.ttl_for("gpt-3.5-turbo"), Duration::from_secs(100));
        assert_eq!(policy.ttl_for("claude-3"), Duration::from_secs(config.default_ttl_seconds));
    }

    #[test]
    fn explicit_disable_wins_over_default_enabled() {
        let config = config_with(vec![ModelCacheOverride {
            model: Some("gpt-4".into()),
            pattern: None,
            ttl_seconds: None,
            enabled: Some(false),
            max_entries: None,
            similarity_threshold: None,
        }]);
        let policy = TtlPolicy::from_config(&config);
        assert!(!policy.enabled_for("gpt-4"));
        assert!(policy.enabled_for("other-model"));
    }

    #[test]
    fn glob_question_mark_and_star() {
        let config = config_with(vec![ModelCacheOverride {
            model: None,
            pattern: Some("gpt-?".into()),
            ttl_seconds: Some(42),
            enabled: None,
            max_entries: None,
            similarity_threshold: None,
        }]);
        let policy = TtlPolicy::from_config(&config);
        assert_eq!(policy.ttl_for("gpt-4"), Duration::from_secs(42));
        assert_ne!(policy.ttl_for("gpt-44"), Duration::from_secs(42));
    }
}
