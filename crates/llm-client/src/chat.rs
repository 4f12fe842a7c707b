use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, LlmResult};
use crate::usage::UsageTracker;

/// Endpoint and model for one OpenAI-compatible chat service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }

    /// Accepts either a bare host or a full `.../chat/completions` URL.
    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatConfig,
    usage: Option<Arc<UsageTracker>>,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> LlmResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            usage: None,
        })
    }

    /// Count tokens against a shared daily budget.
    pub fn with_usage(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.usage = Some(tracker);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// One system + user exchange; returns the first choice's content.
    ///
    /// With a usage tracker attached, a spent budget refuses the call and the
    /// call that crosses the budget returns `BudgetExceeded`.
    pub async fn complete(&self, task: &str, system: &str, user: &str) -> LlmResult<String> {
        if let Some(info) = self
            .usage
            .as_ref()
            .and_then(|u| u.exhausted(chrono::Utc::now().date_naive()))
        {
            return Err(LlmError::BudgetExceeded(info));
        }
        let started = Instant::now();
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("{} returned {}", self.config.name, status);
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: Value = response.json().await?;
        self.record_usage(task, &body, started)?;
        extract_content(&body)
    }

    fn record_usage(&self, task: &str, body: &Value, started: Instant) -> LlmResult<()> {
        let Some(tracker) = &self.usage else {
            return Ok(());
        };
        let tokens = total_tokens(body);
        let latency_ms = started.elapsed().as_millis() as u64;
        let check = tracker.record(chrono::Utc::now().date_naive(), task, tokens, latency_ms);
        if let Some(warn) = check.warn {
            tracing::warn!(
                "Token budget {:?}: {}/{} tokens on {}",
                warn.level,
                warn.total_tokens,
                warn.budget,
                warn.date
            );
        }
        match check.exceeded {
            Some(info) => {
                tracing::error!(
                    "Token budget exceeded by {} ({}): {}/{} tokens on {}",
                    self.config.name,
                    task,
                    info.total_tokens,
                    info.budget,
                    info.date
                );
                Err(LlmError::BudgetExceeded(info))
            }
            None => Ok(()),
        }
    }
}

/// `usage.total_tokens`, or prompt plus completion tokens, of a completion body.
pub fn total_tokens(body: &Value) -> u64 {
    let usage = body.get("usage");
    let field = |name: &str| usage.and_then(|u| u.get(name)).and_then(Value::as_u64);
    field("total_tokens").unwrap_or_else(|| {
        field("prompt_tokens").unwrap_or(0) + field("completion_tokens").unwrap_or(0)
    })
}

/// `choices[0].message.content` of a chat completion body.
pub fn extract_content(body: &Value) -> LlmResult<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_variants() {
        let mut config = ChatConfig::new("deepseek", "https://api.deepseek.com/", "k", "deepseek-chat");
        assert_eq!(config.completions_url(), "https://api.deepseek.com/v1/chat/completions");

        config.base_url = "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string();
        assert_eq!(
            config.completions_url(),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );

        config.base_url = "https://api.example.com/v1".to_string();
        assert_eq!(config.completions_url(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_extract_content() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"bias\":\"long\"}"}}]
        });
        assert_eq!(extract_content(&body).unwrap(), "{\"bias\":\"long\"}");

        let empty = serde_json::json!({"choices": []});
        assert!(matches!(extract_content(&empty), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_total_tokens() {
        let body = serde_json::json!({"usage": {"prompt_tokens": 900, "completion_tokens": 120, "total_tokens": 1020}});
        assert_eq!(total_tokens(&body), 1020);

        let split = serde_json::json!({"usage": {"prompt_tokens": 900, "completion_tokens": 120}});
        assert_eq!(total_tokens(&split), 1020);

        assert_eq!(total_tokens(&serde_json::json!({"choices": []})), 0);
    }

    #[tokio::test]
    async fn test_spent_budget_refuses_before_sending() {
        let tracker = Arc::new(UsageTracker::new(crate::usage::UsageBudget {
            daily_tokens: 100,
            warn_ratio: 0.8,
        }));
        tracker.record(chrono::Utc::now().date_naive(), "decision", 150, 10);

        // Nothing listens on port 9.
        let client = ChatClient::new(ChatConfig::new("deepseek", "http://127.0.0.1:9", "k", "m"))
            .unwrap()
            .with_usage(tracker);
        let err = client.complete("decision", "system", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExceeded(info) if info.total_tokens == 150));
    }
}
