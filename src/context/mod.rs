//! Context-window manager (C16): truncates a message list down to a
//! model's available token budget using one of two strategies.

use crate::config::{AlwaysKeep, ContextConfig, ContextStrategy};

/// Fallback token estimate when no tokenizer is wired up: 4 characters per
/// token (spec §4.16).
const CHARS_PER_TOKEN: usize = 4;

/// One message in the conversation being truncated.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Raw text content, used for the 4-char/token fallback estimate.
    pub content: String,
    /// Whether this is the leading system message.
    pub is_system: bool,
    /// Whether this carries a tool_use/tool_result block.
    pub is_tool: bool,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// System prompt.
    System,
    /// End user.
    User,
    /// Model response.
    Assistant,
    /// Tool invocation or result.
    Tool,
}

fn estimate_tokens(message: &Message) -> usize {
    (message.content.len() / CHARS_PER_TOKEN).max(1)
}

/// The available token budget for a model, after reserving headroom
/// (spec §4.16 `availableTokens`).
pub fn available_tokens(model: &str, config: &ContextConfig) -> usize {
    let limit = config.model_limits.get(model).copied().unwrap_or(8192);
    limit.saturating_sub(config.reserved_tokens)
}

/// Truncate `messages` for `model` given the caller's current token count.
/// Returns the input unchanged if it already fits (spec §4.16).
pub fn truncate(messages: Vec<Message>, model: &str, current_tokens: usize, config: &ContextConfig) -> Vec<Message> {
    let available = available_tokens(model, config);
    if current_tokens <= available {
        return messages;
    }

    match config.strategy {
        ContextStrategy::SlidingWindow => sliding_window(messages, available, &config.always_keep),
        ContextStrategy::Priority => priority(messages, available, &config.always_keep),
    }
}

/// Keep the system prompt plus a mandatory floor of the `recent_messages`
/// newest messages, then extend backward through whatever's older,
/// contiguously, for as long as it still fits the remaining budget (spec
/// §8 scenario 6: floor is a minimum, not a cap).
fn sliding_window(messages: Vec<Message>, available: usize, always_keep: &AlwaysKeep) -> Vec<Message> {
    let mut budget = available;

    let mut rest: Vec<Message> = messages;
    let system = if always_keep.system_prompt {
        rest.iter().position(|m| m.is_system).map(|pos| {
            let system = rest.remove(pos);
            budget = budget.saturating_sub(estimate_tokens(&system));
            system
        })
    } else {
        None
    };

    let floor_start = rest.len().saturating_sub(always_keep.recent_messages);
    let floor: Vec<Message> = rest.split_off(floor_start);
    let older = rest;

    for message in &floor {
        budget = budget.saturating_sub(estimate_tokens(message));
    }

    let mut extended = Vec::new();
    for message in older.into_iter().rev() {
        let cost = estimate_tokens(&message);
        if cost > budget {
            break;
        }
        budget -= cost;
        extended.push(message);
    }
    extended.reverse();

    let mut kept = Vec::new();
    kept.extend(system);
    kept.extend(extended);
    kept.extend(floor);
    kept
}

fn priority(messages: Vec<Message>, available: usize, always_keep: &AlwaysKeep) -> Vec<Message> {
    let total = messages.len();
    let recent_threshold = always_keep.recent_messages;

    let mut scored: Vec<(usize, i64, Message)> = messages
        .into_iter()
        .enumerate()
        .map(|(index, message)| {
            let mut score: i64 = 0;
            if message.is_system && always_keep.system_prompt {
                score += 1000;
            }
            if total.saturating_sub(index) <= recent_threshold {
                score += 500;
            }
            if message.is_tool {
                score += 200;
            }
            if message.role == Role::User {
                score += 50;
            }
            (index, score, message)
        })
        .collect();

    // Sort stable descending by score; index (already the original order)
    // acts as the tie-breaker because the sort is stable.
    scored.sort_by_key(|(_, score, _)| std::cmp::Reverse(*score));

    let mut budget = available;
    let mut kept_indices = Vec::new();
    let mut kept_messages = std::collections::HashMap::new();
    for (index, _score, message) in scored {
        let cost = estimate_tokens(&message);
        if cost > budget {
            continue;
        }
        budget -= cost;
        kept_indices.push(index);
        kept_messages.insert(index, message);
    }

    kept_indices.sort_unstable();
    kept_indices
        .into_iter()
        .filter_map(|index| kept_messages.remove(&index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            role,
            content: content.to_string(),
            is_system: role == Role::System,
            is_tool: false,
        }
    }

    fn config_with_limit(limit: usize) -> ContextConfig {
        ContextConfig {
            model_limits: [("test-model".to_string(), limit)].into_iter().collect(),
            ..Default::default()
        }
    }

    fn config_with_limit_and_reserved(limit: usize, reserved: usize) -> ContextConfig {
        ContextConfig {
            reserved_tokens: reserved,
            ..config_with_limit(limit)
        }
    }

    #[test]
    fn under_budget_returns_unchanged() {
        let config = config_with_limit(8192);
        let messages = vec![msg(Role::User, "hi")];
        let out = truncate(messages.clone(), "test-model", 10, &config);
        assert_eq!(out, messages);
    }

    #[test]
    fn sliding_window_keeps_system_and_recent_messages() {
        let mut config = config_with_limit(ContextConfig::default().reserved_tokens + 40);
        config.always_keep.recent_messages = 2;
        let messages = vec![
            msg(Role::System, "sys"),
            msg(Role::User, &"a".repeat(400)),
            msg(Role::User, "recent-1"),
            msg(Role::User, "recent-2"),
        ];
        let out = truncate(messages, "test-model", 100_000, &config);
        assert!(out.first().unwrap().is_system);
        assert!(out.iter().any(|m| m.content == "recent-2"));
    }

    #[test]
    fn priority_strategy_preserves_original_order_in_output() {
        let mut config = config_with_limit(ContextConfig::default().reserved_tokens + 200);
        config.strategy = ContextStrategy::Priority;
        let messages = vec![
            msg(Role::System, "sys"),
            msg(Role::Assistant, "old-1"),
            msg(Role::User, "old-2"),
            msg(Role::User, "newest"),
        ];
        let out = truncate(messages, "test-model", 100_000, &config);
        let positions: Vec<&str> = out.iter().map(|m| m.content.as_str()).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        // Output must preserve original relative order among kept messages.
        assert_eq!(positions.first().copied(), Some("sys"));
    }

    #[test]
    fn priority_never_drops_the_single_newest_message_when_it_fits() {
        let mut config = config_with_limit(ContextConfig::default().reserved_tokens + 10);
        config.strategy = ContextStrategy::Priority;
        let messages = vec![msg(Role::User, "short")];
        let out = truncate(messages, "test-model", 100_000, &config);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn context_truncation_keeps_system_and_last_n() {
        // Scenario 6 from spec §8, verbatim.
        let mut config = config_with_limit_and_reserved(1000, 200);
        config.always_keep.recent_messages = 3;
        let messages = vec![
            msg(Role::System, "system"),
            msg(Role::User, "u1"),
            // Large enough (~1000 tokens) to exceed the remaining budget and
            // stop the backward extension before it reaches "u1".
            msg(Role::Assistant, &"x".repeat(4000)),
            msg(Role::User, "u2"),
            msg(Role::Assistant, "a2"),
            msg(Role::User, "u3"),
            msg(Role::Assistant, "a3"),
        ];
        assert_eq!(available_tokens("test-model", &config), 800);

        let out = truncate(messages, "test-model", 1500, &config);
        let contents: Vec<&str> = out.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["system", "u2", "a2", "u3", "a3"]);
    }
}
