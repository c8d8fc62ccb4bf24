//! LM client: chat-completion transport with validated-JSON retry and
//! per-call cost accounting.

use crate::config::Config;
use crate::context::LmEstimate;
use crate::errors::TraderError;
use crate::store::Store;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;

pub const COST_SERVICE_LM: &str = "llm";

#[derive(Debug, Clone)]
pub struct LmCompletion {
    pub content: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Clone)]
pub struct LmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    usd_per_input_token: f64,
    usd_per_output_token: f64,
    store: Arc<Store>,
}

impl LmClient {
    pub fn new(cfg: &Config, store: Arc<Store>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: cfg.lm_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.lm_api_key.clone(),
            model: cfg.lm_model.clone(),
            max_tokens: cfg.lm_max_tokens,
            timeout: Duration::from_secs(cfg.lm_timeout_secs),
            usd_per_input_token: cfg.lm_usd_per_input_token,
            usd_per_output_token: cfg.lm_usd_per_output_token,
            store,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<LmCompletion> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(0.2),
            max_tokens: Some(max_tokens),
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| TraderError::http("lm request", &e))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(400).collect();
            let kind = if status.as_u16() == 429 || status.is_server_error() {
                TraderError::TransientIo(format!("lm {}: {}", status.as_u16(), snippet))
            } else {
                TraderError::Protocol(format!("lm {}: {}", status.as_u16(), snippet))
            };
            return Err(kind.into());
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).context("lm json")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(LmCompletion {
            content,
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    fn record_cost(&self, prompt: &str, completion: &LmCompletion) {
        let tokens_in = completion
            .prompt_tokens
            .unwrap_or_else(|| estimate_tokens(prompt));
        let tokens_out = completion
            .completion_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.content));
        let usd = tokens_in as f64 * self.usd_per_input_token
            + tokens_out as f64 * self.usd_per_output_token;
        if let Err(err) = self.store.add_api_cost(COST_SERVICE_LM, 1, usd) {
            warn!(error = %err, "failed to record lm cost");
        }
    }

    /// Estimate a market. Up to three attempts with linear backoff; a
    /// validated estimate increments the cost counter, exhaustion records a
    /// parse failure and yields None. Never errors to the caller.
    pub async fn call(&self, prompt: &str, market_id: &str) -> Option<LmEstimate> {
        for attempt in 0..MAX_ATTEMPTS {
            match self.complete(prompt, self.max_tokens).await {
                Ok(completion) => {
                    if let Some(value) = tolerant_parse(&completion.content) {
                        match LmEstimate::from_value(&value) {
                            Ok(estimate) => {
                                self.record_cost(prompt, &completion);
                                return Some(estimate);
                            }
                            Err(err) => {
                                debug!(market_id, attempt, error = %err, "lm estimate invalid");
                            }
                        }
                    } else {
                        debug!(market_id, attempt, "lm response not parseable as json");
                    }
                }
                Err(err) => {
                    debug!(market_id, attempt, error = %err, "lm transport failure");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
            }
        }

        warn!(market_id, "lm estimate failed after {} attempts", MAX_ATTEMPTS);
        if let Err(err) = self.store.add_parse_failure(COST_SERVICE_LM) {
            warn!(error = %err, "failed to record parse failure");
        }
        None
    }

    /// Keyword fallback for the extractor: terse prompt, JSON array out.
    pub async fn keywords(&self, question: &str) -> Option<Vec<String>> {
        let prompt = format!(
            "Extract 3-5 search keywords for this prediction market question.\n\
             Return a JSON array of lowercase strings only.\n\nQuestion: {}",
            question
        );
        for attempt in 0..MAX_ATTEMPTS {
            match self.complete(&prompt, 120).await {
                Ok(completion) => {
                    if let Some(value) = tolerant_parse_array(&completion.content) {
                        let words: Vec<String> = value
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.trim().to_lowercase())
                            .filter(|s| !s.is_empty())
                            .take(5)
                            .collect();
                        if !words.is_empty() {
                            self.record_cost(&prompt, &completion);
                            return Some(words);
                        }
                    }
                }
                Err(err) => {
                    debug!(attempt, error = %err, "keyword lm failure");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
            }
        }
        None
    }
}

/// Tolerant object parse: direct, then fenced-code stripping, then the
/// widest `{...}` span with dot-matches-newline semantics.
pub fn tolerant_parse(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    if let Some(inner) = strip_code_fences(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

/// Same ladder for a JSON array payload.
pub fn tolerant_parse_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(trimmed) {
        return Some(arr);
    }
    if let Some(inner) = strip_code_fences(trimmed) {
        if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(arr);
        }
    }
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Array(arr)) => Some(arr),
        _ => None,
    }
}

/// Strip ``` fences, optionally tagged (```json).
fn strip_code_fences(text: &str) -> Option<&str> {
    let after_open = text.split_once("```")?.1;
    // Drop an optional language tag up to the first newline
    let body = match after_open.split_once('\n') {
        Some((first_line, rest)) if first_line.len() <= 16 => rest,
        _ => after_open,
    };
    Some(body.split_once("```").map(|(inner, _)| inner).unwrap_or(body))
}

fn estimate_tokens(s: &str) -> u64 {
    (s.len() as u64 + 3) / 4
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let v = tolerant_parse(r#"{"estimated_probability": 0.7}"#).unwrap();
        assert_eq!(v["estimated_probability"], 0.7);
    }

    #[test]
    fn parses_fenced_json_with_tag() {
        let text = "Here you go:\n```json\n{\"confidence\": 0.61}\n```\nthanks";
        let v = tolerant_parse(text).unwrap();
        assert_eq!(v["confidence"], 0.61);
    }

    #[test]
    fn parses_fenced_json_without_tag() {
        let text = "```\n{\"confidence\": 0.5}\n```";
        let v = tolerant_parse(text).unwrap();
        assert_eq!(v["confidence"], 0.5);
    }

    #[test]
    fn extracts_embedded_object_across_newlines() {
        let text = "Reasoning first.\n{\n  \"estimated_probability\": 0.55,\n  \"confidence\": 0.6\n}\ntrailing";
        let v = tolerant_parse(text).unwrap();
        assert_eq!(v["estimated_probability"], 0.55);
    }

    #[test]
    fn rejects_garbage() {
        assert!(tolerant_parse("no json here").is_none());
        assert!(tolerant_parse("{broken").is_none());
    }

    #[test]
    fn parses_keyword_arrays() {
        let arr = tolerant_parse_array("```json\n[\"fed\", \"rate cut\"]\n```").unwrap();
        assert_eq!(arr.len(), 2);
        let arr = tolerant_parse_array("keywords: [\"btc\", \"etf\"] done").unwrap();
        assert_eq!(arr[0], "btc");
    }

    #[test]
    fn token_estimate_quarter_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
