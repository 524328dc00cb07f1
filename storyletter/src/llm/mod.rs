use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Core trait for the external writer service
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Write one candidate story combining the given themes.
    ///
    /// The returned draft is unvalidated; the generator rejects drafts that
    /// do not carry a title, exactly 3 summary bullets and non-empty content.
    async fn write_story(&self, themes: &[String]) -> Result<StoryDraft>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// One candidate story as returned by the writer, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryDraft {
    pub title: String,
    /// Exactly 3 short strings once validated
    pub summary_bullets: Vec<String>,
    /// HTML-formatted body (<p> tags)
    pub content: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        return Some(text[start..=end].to_string());
    }

    None
}
