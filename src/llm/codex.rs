use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{build_agent, endpoint, post_json, LlmReply, ProviderConfig};
use crate::error::{GatewayError, GatewayResult};

const PROVIDER: &str = "Codex";
const COMPLETION_MODEL: &str = "gpt-3.5-turbo-instruct";
const CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Client for the OpenAI completion and chat completion endpoints.
pub struct CodexClient {
    api_key: Option<String>,
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Value,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: Option<String>,
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl CompletionChoice {
    fn into_text(self) -> Option<String> {
        self.message.and_then(|m| m.content).or(self.text)
    }
}

impl CodexClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid OpenAI base url '{}'", config.base_url))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url,
            agent: build_agent(config.timeout),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Continue `code` with the instruct completion model.
    pub fn complete_code(&self, code: &str) -> GatewayResult<LlmReply> {
        let body = json!({
            "model": COMPLETION_MODEL,
            "prompt": code,
            "max_tokens": 500,
            "temperature": 0.1,
            "stop": ["\n\n", "```"],
        });
        self.send("v1/completions", &body)
    }

    pub fn generate_code(&self, prompt: &str, language: &str) -> GatewayResult<LlmReply> {
        let system = format!(
            "Generate {language} code based on the following prompt. Make sure the code is functional, well-commented, and follows best practices."
        );
        self.chat(Some(&system), prompt, 1000, 0.1)
    }

    pub fn explain_code(&self, code: &str, language: &str) -> GatewayResult<LlmReply> {
        let prompt = format!(
            "Explain this {language} code in detail, including:\n1. What the code does\n2. How it works step by step\n3. Key concepts and patterns used\n4. Potential use cases\n\nCode:\n```{language}\n{code}\n```"
        );
        self.chat(None, &prompt, 800, 0.3)
    }

    pub fn debug_code(
        &self,
        code: &str,
        language: &str,
        error_message: Option<&str>,
    ) -> GatewayResult<LlmReply> {
        let focus = match error_message.filter(|e| !e.trim().is_empty()) {
            Some(error) => format!("Error message: {}", error),
            None => "Identify potential issues and provide fixes.".to_string(),
        };
        let prompt = format!(
            "Debug this {language} code. {focus}\n\nCode:\n```{language}\n{code}\n```\n\nPlease provide:\n1. Identified issues\n2. Fixed code\n3. Explanation of the fixes"
        );
        self.chat(None, &prompt, 1000, 0.1)
    }

    pub fn optimize_code(&self, code: &str, language: &str) -> GatewayResult<LlmReply> {
        let prompt = format!(
            "Optimize this {language} code for better performance, readability, and maintainability. Provide the optimized version with explanations of improvements.\n\nCode:\n```{language}\n{code}\n```"
        );
        self.chat(None, &prompt, 1000, 0.1)
    }

    fn chat(
        &self,
        system: Option<&str>,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> GatewayResult<LlmReply> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": user }));
        let body = json!({
            "model": CHAT_MODEL,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        self.send("v1/chat/completions", &body)
    }

    fn send(&self, path: &str, body: &Value) -> GatewayResult<LlmReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::ProviderNotConfigured("OpenAI"))?;
        let authorization = format!("Bearer {}", api_key);
        let url = endpoint(&self.base_url, path);
        log::debug!("codex request path={}", path);
        let value = post_json(
            &self.agent,
            PROVIDER,
            &url,
            &[("authorization", authorization.as_str())],
            body,
        )?;
        let response: CompletionResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::upstream(PROVIDER, format!("unexpected response: {}", e)))?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(CompletionChoice::into_text)
            .ok_or_else(|| GatewayError::upstream(PROVIDER, "response contained no choices"))?;
        Ok(LlmReply {
            text,
            usage: response.usage,
            model: response.model,
        })
    }
}
