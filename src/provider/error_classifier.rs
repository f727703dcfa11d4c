//! Provider error classifier (C14): maps a raw upstream response into a
//! structured, provider-aware decision the retry policy (C15) and dispatch
//! layer can act on without knowing each provider's wire quirks.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Which upstream produced the response (spec §4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderTag {
    /// OpenAI-family API.
    OpenAi,
    /// Anthropic-family API.
    Anthropic,
    /// Gemini-family API.
    Gemini,
    /// Any other/unrecognized upstream.
    Unknown,
}

impl ProviderTag {
    /// Map a provider name (case-insensitive) to its tag, defaulting to
    /// `Unknown` for anything unrecognized.
    pub fn from_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "openai" => ProviderTag::OpenAi,
            "anthropic" => ProviderTag::Anthropic,
            "gemini" | "google" => ProviderTag::Gemini,
            _ => ProviderTag::Unknown,
        }
    }
}

/// A classified provider error (spec §3 "Provider error").
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderError {
    /// Which provider produced this error.
    pub provider: ProviderTag,
    /// HTTP status code of the response.
    pub status: u16,
    /// Short machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the retry policy should attempt again.
    pub retryable: bool,
    /// Whether dispatch should select a different credential before retry.
    pub should_failover: bool,
    /// Provider-supplied or default delay before retrying.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicErrorBody {
    error: Option<AnthropicErrorDetail>,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiErrorBody {
    error: Option<OpenAiErrorDetail>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// Classify a raw upstream response (spec §4.14 decision table).
pub fn classify(provider: ProviderTag, status: u16, body: &[u8]) -> ProviderError {
    match provider {
        ProviderTag::Anthropic => classify_anthropic(status, body),
        ProviderTag::OpenAi => classify_openai(status, body),
        ProviderTag::Gemini => classify_generic(provider, status, body),
        ProviderTag::Unknown => classify_generic(provider, status, body),
    }
}

fn body_message(body: &[u8]) -> String {
    String::from_utf8_lossy(body).trim().to_string()
}

fn classify_anthropic(status: u16, body: &[u8]) -> ProviderError {
    let parsed: AnthropicErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let kind = parsed.error.as_ref().and_then(|e| e.kind.clone()).unwrap_or_default();
    let message = parsed
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body_message(body));

    // Anthropic can report an overload on an HTTP 200 response (spec §4.14,
    // open question: treat as a failure regardless of status).
    if kind == "overloaded_error" {
        return ProviderError {
            provider: ProviderTag::Anthropic,
            status,
            code: "overloaded_error".to_string(),
            message,
            retryable: true,
            should_failover: true,
            retry_after: Some(Duration::from_secs(30)),
        };
    }

    let mut classified = status_defaults(ProviderTag::Anthropic, status, message.clone());
    if status == 529 {
        classified.retryable = true;
        classified.should_failover = true;
        classified.retry_after = Some(Duration::from_secs(30));
        classified.code = "overloaded".to_string();
    }
    classified
}

fn classify_openai(status: u16, body: &[u8]) -> ProviderError {
    let parsed: OpenAiErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body_message(body));
    let openai_code = parsed.error.as_ref().and_then(|e| e.code.clone());
    let openai_kind = parsed.error.as_ref().and_then(|e| e.kind.clone());

    let mut classified = status_defaults(ProviderTag::OpenAi, status, message.clone());

    if status == 400 {
        let lower = message.to_ascii_lowercase();
        if lower.contains("context_length") || lower.contains("maximum context length") {
            classified.code = "context_length_exceeded".to_string();
            classified.retryable = false;
            classified.should_failover = false;
        }
    }

    if status == 403 {
        let is_quota = openai_code.as_deref() == Some("insufficient_quota")
            || openai_kind.as_deref() == Some("insufficient_quota")
            || message.to_ascii_lowercase().contains("quota");
        if is_quota {
            classified.should_failover = true;
            classified.code = "insufficient_quota".to_string();
        }
    }

    classified
}

fn classify_generic(provider: ProviderTag, status: u16, body: &[u8]) -> ProviderError {
    status_defaults(provider, status, body_message(body))
}

/// Status-code-only defaults shared by all providers (spec §4.14 table,
/// and the unknown-provider fallback).
fn status_defaults(provider: ProviderTag, status: u16, message: String) -> ProviderError {
    let (code, retryable, should_failover, retry_after) = match status {
        400 => ("bad_request", false, false, None),
        401 => ("unauthorized", false, false, None),
        403 => ("forbidden", false, false, None),
        429 => ("rate_limited", true, true, Some(Duration::from_secs(20))),
        500 | 502 | 503 => ("upstream_error", true, false, Some(Duration::from_secs(5))),
        504 => ("gateway_timeout", true, false, Some(Duration::from_secs(10))),
        529 => ("overloaded", true, true, Some(Duration::from_secs(30))),
        s if s >= 500 => ("upstream_error", true, false, Some(Duration::from_secs(5))),
        s if s >= 400 => ("client_error", false, false, None),
        _ => ("ok", false, false, None),
    };

    ProviderError {
        provider,
        status,
        code: code.to_string(),
        message,
        retryable,
        should_failover,
        retry_after,
    }
}

/// Extract a best-effort JSON error message for logging/audit, tolerant of
/// malformed or non-JSON bodies.
pub fn best_effort_message(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body_message(body)),
        Err(_) => body_message(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_overloaded_on_200_is_still_a_failure() {
        // Scenario 5 from spec §8.
        let body = br#"{"error":{"type":"overloaded_error","message":"overloaded"}}"#;
        let classified = classify(ProviderTag::Anthropic, 200, body);
        assert!(classified.retryable);
        assert!(classified.should_failover);
        assert_eq!(classified.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(classified.code, "overloaded_error");
    }

    #[test]
    fn openai_400_context_length_is_not_retryable() {
        let body = br#"{"error":{"message":"This model's maximum context length is 8192 tokens"}}"#;
        let classified = classify(ProviderTag::OpenAi, 400, body);
        assert_eq!(classified.code, "context_length_exceeded");
        assert!(!classified.retryable);
        assert!(!classified.should_failover);
    }

    #[test]
    fn rate_limit_is_retryable_and_triggers_failover() {
        let classified = classify(ProviderTag::OpenAi, 429, b"{}");
        assert!(classified.retryable);
        assert!(classified.should_failover);
    }

    #[test]
    fn unknown_provider_uses_status_only_defaults() {
        let classified = classify(ProviderTag::Unknown, 503, b"{}");
        assert!(classified.retryable);
        assert!(!classified.should_failover);
    }

    #[test]
    fn client_errors_are_not_retryable_by_default() {
        let classified = classify(ProviderTag::Gemini, 400, b"{}");
        assert!(!classified.retryable);
    }
}
