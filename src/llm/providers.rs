use super::interfaces::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Base trait for all LLM providers
#[async_trait]
pub trait LLMProvider: LLMInterface {
    fn name(&self) -> &str;
    fn supports_tools(&self) -> bool;
}

/// OpenAI-compatible chat completions provider
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    config: LLMConfig,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .context("OpenAI API key not found")?;

        let base_url = resolve_base_url(config.base_url.clone(), std::env::var("BASE_URL").ok());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(60)))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(&self, request: &LLMRequest) -> Value {
        let mut messages = vec![];

        if let Some(system) = &request.system_prompt {
            messages.push(json!({
                "role": "system",
                "content": system
            }));
        }

        for msg in &request.messages {
            messages.push(message_to_json(msg));
        }

        let mut body = json!({
            "model": request.model.as_str(),
            "messages": messages,
            "temperature": request.temperature.or(self.config.temperature).unwrap_or(0.1),
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                }))
                .collect::<Vec<_>>());
        }

        body
    }

    async fn make_request(&self, body: &Value) -> Result<LLMResponse, backoff::Error<anyhow::Error>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::Error::new(e).context("OpenAI request failed")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::Error::new(e)))?;

        if !status.is_success() {
            let err = anyhow::anyhow!("OpenAI API error: {} - {}", status, text);
            return Err(if is_retryable(status) {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| backoff::Error::permanent(anyhow::Error::new(e).context("Invalid OpenAI response")))?;

        parse_completion(&data).map_err(backoff::Error::permanent)
    }
}

/// Configured URL first, then the environment, then the public endpoint. Blank values are skipped.
fn resolve_base_url(configured: Option<String>, from_env: Option<String>) -> String {
    configured
        .into_iter()
        .chain(from_env)
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .find(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn message_to_json(msg: &Message) -> Value {
    match msg.role {
        MessageRole::System => json!({"role": "system", "content": msg.content}),
        MessageRole::User => json!({"role": "user", "content": msg.content}),
        MessageRole::Assistant => {
            let mut value = json!({"role": "assistant", "content": msg.content});
            if let Some(calls) = &msg.tool_calls {
                value["tool_calls"] = json!(calls
                    .iter()
                    .map(|c| json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments}
                    }))
                    .collect::<Vec<_>>());
            }
            value
        }
        MessageRole::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content
        }),
    }
}

fn parse_completion(data: &Value) -> Result<LLMResponse> {
    let choice = data["choices"]
        .get(0)
        .context("No choices in OpenAI response")?;
    let usage = &data["usage"];
    let message = &choice["message"];

    let tool_calls = message["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .map(|call| ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments: call["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
            })
            .collect::<Vec<_>>()
    });

    Ok(LLMResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls: tool_calls.filter(|calls| !calls.is_empty()),
        finish_reason: match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        },
        usage: Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
        },
    })
}

#[async_trait]
impl LLMInterface for OpenAIProvider {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse> {
        let max_retries = self.config.max_retries.unwrap_or(3).max(1);
        let body = self.build_body(&request);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempt = 0;
        let response = retry(policy, || {
            attempt += 1;
            let current = attempt;
            let body = &body;
            async move {
                match self.make_request(body).await {
                    Err(backoff::Error::Transient { err, .. }) if current >= max_retries => {
                        Err(backoff::Error::permanent(err))
                    }
                    Err(backoff::Error::Transient { err, retry_after }) => {
                        warn!("LLM request attempt {} failed: {}", current, err);
                        Err(backoff::Error::Transient { err, retry_after })
                    }
                    other => other,
                }
            }
        })
        .await?;

        debug!(
            "LLM responded with {} tool calls, {} total tokens",
            response.tool_calls.as_ref().map_or(0, |c| c.len()),
            response.usage.total_tokens
        );
        Ok(response)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn supports_tools(&self) -> bool {
        true
    }
}

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create(config: LLMConfig) -> Result<Box<dyn LLMProvider>> {
        match config.provider.to_lowercase().as_str() {
            "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
            _ => Err(anyhow::anyhow!("Unknown LLM provider: {}", config.provider)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new(LLMConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:8080/v1/".to_string()),
            ..LLMConfig::default()
        })
        .unwrap()
    }

    fn request(messages: Vec<Message>, tools: Option<Vec<Tool>>) -> LLMRequest {
        LLMRequest {
            messages,
            model: Model::GPT4oMini,
            temperature: None,
            max_tokens: None,
            system_prompt: Some("You review pull requests.".to_string()),
            tools,
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        assert_eq!(provider().base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_blank_base_url_falls_back_to_default() {
        assert_eq!(resolve_base_url(None, Some(String::new())), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(Some("  ".to_string()), None), DEFAULT_BASE_URL);
        assert_eq!(
            resolve_base_url(Some(String::new()), Some("http://localhost:11434/v1/".to_string())),
            "http://localhost:11434/v1"
        );
        assert_eq!(
            resolve_base_url(Some("http://proxy/v1".to_string()), Some("http://other/v1".to_string())),
            "http://proxy/v1"
        );
    }

    #[test]
    fn test_request_body_includes_tools_and_tool_messages() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_pr_details".to_string(),
            arguments: r#"{"pr_number": 4}"#.to_string(),
        };
        let messages = vec![
            Message::user("Review PR 4"),
            Message::assistant("", vec![call]),
            Message::tool("call_1", r#"{"title": "Fix"}"#),
        ];
        let tools = vec![Tool {
            name: "get_pr_details".to_string(),
            description: "Get PR information".to_string(),
            parameters: json!({"type": "object"}),
        }];

        let body = provider().build_body(&request(messages, Some(tools)));

        assert_eq!(body["model"], "gpt-4o-mini");
        let sent = body["messages"].as_array().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0]["role"], "system");
        assert_eq!(sent[2]["tool_calls"][0]["function"]["name"], "get_pr_details");
        assert_eq!(sent[3]["role"], "tool");
        assert_eq!(sent[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_pr_details");
    }

    #[test]
    fn test_request_body_omits_empty_tool_list() {
        let body = provider().build_body(&request(vec![Message::user("hi")], Some(vec![])));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_tool_call_response() {
        let data = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "handoff", "arguments": "{\"to_agent\":\"ContextAgent\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let response = parse_completion(&data).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].name, "handoff");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_response_without_choices() {
        assert!(parse_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }
}
