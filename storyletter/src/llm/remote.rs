use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, StoryDraft, UsageMetadata};

/// Remote writer service using an OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(60),
            default_max_tokens: 1200,
            default_temperature: 0.8,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        let temperature = request.temperature.unwrap_or(self.default_temperature);

        // Build OpenAI-compatible request
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt {
            messages.push(Message {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt,
        });

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        // Make HTTP request with timeout
        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .first()
            .context("LLM response has no choices")?;

        let usage = UsageMetadata {
            prompt_tokens: resp_body.usage.prompt_tokens.unwrap_or(0),
            completion_tokens: resp_body.usage.completion_tokens.unwrap_or(0),
            total_tokens: resp_body.usage.total_tokens.unwrap_or(0),
        };

        Ok(LlmResponse {
            content: choice.message.content.clone(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn write_story(&self, themes: &[String]) -> Result<StoryDraft> {
        let theme_list = themes.join(", ");

        let system_prompt = format!(
            r#"You are a professional children's book author. Write creative, calming, and engaging bedtime stories for ages 5-10.

CORE TASK: Write a story that creatively combines these specific themes: [{}].

Always return valid JSON with:
- title: String
- summary_bullets: Array of exactly 3 strings (with emojis)
- content: String (HTML formatted with <p> tags).

STRICT SAFETY: No adult language, violence, or explicit content. Must be 100% child-friendly.
TONE: Simple plain English, easy to read, absolutely no scary content."#,
            theme_list
        );

        let request = LlmRequest {
            system_prompt: Some(system_prompt),
            prompt: "Write a creative bedtime story based on the themes provided in the system instruction. Length: approx 400 words.".to_string(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        };

        let response = self.generate(request).await?;

        // Robust JSON extraction: handle markdown backticks, preamble, etc.
        let cleaned_json = super::extract_json_from_text(&response.content)
            .context("No valid JSON found in writer response")?;

        let draft: StoryDraft = serde_json::from_str(&cleaned_json).context(format!(
            "Failed to parse writer output as JSON. Input was: {}",
            cleaned_json
        ))?;

        Ok(draft)
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}
