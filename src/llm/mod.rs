//! Blocking clients for the hosted LLM providers.
//!
//! Both clients map one call onto one HTTP request. There is no retry,
//! backoff or queueing; provider failures surface as
//! [`GatewayError::UpstreamProviderError`].

mod claude;
mod codex;

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::{GatewayError, GatewayResult};

pub use claude::{ClaudeClient, DEFAULT_CLAUDE_MODEL};
pub use codex::CodexClient;

/// Connection settings shared by both providers.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

/// Text produced by a provider plus its usage accounting.
#[derive(Clone, Debug)]
pub struct LlmReply {
    pub text: String,
    pub usage: Value,
    pub model: Option<String>,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Join `path` under `base`, keeping any path prefix the base carries.
fn endpoint(base: &Url, path: &str) -> String {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map(String::from)
        .unwrap_or_else(|_| format!("{}{}", base, path))
}

fn post_json(
    agent: &ureq::Agent,
    provider: &'static str,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> GatewayResult<Value> {
    let mut request = agent.post(url).set("content-type", "application/json");
    for (name, value) in headers {
        request = request.set(name, value);
    }
    match request.send_string(&body.to_string()) {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|e| GatewayError::upstream(provider, format!("read response: {}", e)))?;
            serde_json::from_str(&text).map_err(|e| {
                GatewayError::upstream(provider, format!("invalid response body: {}", e))
            })
        }
        Err(ureq::Error::Status(code, response)) => {
            let text = response.into_string().unwrap_or_default();
            Err(GatewayError::upstream(
                provider,
                format!("status {}: {}", code, error_detail(&text)),
            ))
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(GatewayError::upstream(provider, transport.to_string()))
        }
    }
}

/// Pull `error.message` out of a provider error body, or fall back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_prefix() {
        let base = Url::parse("http://127.0.0.1:9000/proxy").unwrap();
        assert_eq!(
            endpoint(&base, "v1/messages"),
            "http://127.0.0.1:9000/proxy/v1/messages"
        );
        let base = Url::parse("https://api.anthropic.com").unwrap();
        assert_eq!(
            endpoint(&base, "v1/messages"),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn error_detail_prefers_provider_message() {
        assert_eq!(
            error_detail(r#"{"error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#),
            "max_tokens too large"
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }
}
