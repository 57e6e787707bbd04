use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{build_agent, endpoint, post_json, LlmReply, ProviderConfig};
use crate::error::{GatewayError, GatewayResult};

const PROVIDER: &str = "Claude";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-sonnet-20240229";

/// Client for the Anthropic Messages API.
pub struct ClaudeClient {
    api_key: Option<String>,
    base_url: Url,
    default_model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Value,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl ClaudeClient {
    pub fn new(config: &ProviderConfig, default_model: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid Anthropic base url '{}'", config.base_url))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url,
            default_model: default_model.into(),
            agent: build_agent(config.timeout),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn chat(&self, message: &str, model: Option<&str>) -> GatewayResult<LlmReply> {
        let model = model.unwrap_or(&self.default_model).to_string();
        self.messages(&model, 1000, message)
    }

    pub fn generate_code(&self, prompt: &str, language: &str) -> GatewayResult<LlmReply> {
        let content = format!(
            "You are an expert {language} developer. Generate clean, efficient, and well-commented code based on the user's prompt. Always include proper error handling and follow best practices.\n\nUser prompt: {prompt}"
        );
        self.messages(&self.default_model, 2000, &content)
    }

    pub fn analyze_code(&self, code: &str, language: &str) -> GatewayResult<LlmReply> {
        let content = format!(
            "Analyze this {language} code and provide:\n1. Code quality assessment\n2. Potential bugs or issues\n3. Performance improvements\n4. Best practices recommendations\n5. Security considerations\n\nCode to analyze:\n```{language}\n{code}\n```"
        );
        self.messages(&self.default_model, 1500, &content)
    }

    pub fn refactor_code(
        &self,
        code: &str,
        language: &str,
        requirements: Option<&str>,
    ) -> GatewayResult<LlmReply> {
        let extra = requirements
            .filter(|r| !r.trim().is_empty())
            .map(|r| format!(" Additional requirements: {}", r))
            .unwrap_or_default();
        let content = format!(
            "Refactor this {language} code to make it more maintainable, efficient, and readable.{extra}\n\nOriginal code:\n```{language}\n{code}\n```\n\nPlease provide the refactored code with explanations of the changes made."
        );
        self.messages(&self.default_model, 2000, &content)
    }

    fn messages(&self, model: &str, max_tokens: u32, content: &str) -> GatewayResult<LlmReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::ProviderNotConfigured("Anthropic"))?;
        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": content }],
        });
        let url = endpoint(&self.base_url, "v1/messages");
        log::debug!("claude request model={} max_tokens={}", model, max_tokens);
        let value = post_json(
            &self.agent,
            PROVIDER,
            &url,
            &[("x-api-key", api_key), ("anthropic-version", ANTHROPIC_VERSION)],
            &body,
        )?;
        let response: MessagesResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::upstream(PROVIDER, format!("unexpected response: {}", e)))?;
        let text = response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| GatewayError::upstream(PROVIDER, "response contained no text"))?;
        Ok(LlmReply {
            text,
            usage: response.usage,
            model: response.model,
        })
    }
}
