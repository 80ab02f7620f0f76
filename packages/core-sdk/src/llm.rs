use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::models::Profile;
use crate::presets::{ProviderFamily, ProviderId};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const APP_REFERER: &str = "https://github.com/startuplens/startuplens";
const APP_TITLE: &str = "StartupLens Startup Analyzer";

/**
 * \brief Provider-neutral completion request.
 */
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f64,
}

/**
 * \brief Request shaping and response parsing for one provider family.
 * \details Adapters never touch the network themselves; the caller sends the built request,
 *          so cancellation and retries stay in one place.
 */
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &CompletionRequest<'_>,
    ) -> reqwest::RequestBuilder;

    /** \brief Answer text from a success envelope; empty when the shape is unexpected. */
    fn extract_content(&self, body: &Value) -> String;
}

/**
 * \brief OpenAI-compatible chat completions (OpenRouter, OpenAI, DeepSeek, custom gateways).
 */
pub struct OpenAiAdapter {
    base_url: String,
    api_key: String,
    /** \brief Send OpenRouter's identification headers */
    identify: bool,
}

impl OpenAiAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, provider: ProviderId) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            identify: provider == ProviderId::OpenRouter,
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAiCompatible
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &CompletionRequest<'_>,
    ) -> reqwest::RequestBuilder {
        let body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "temperature": request.temperature,
            "stream": false
        });
        let mut builder = client
            .post(&self.base_url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key);
        // strict servers reject unknown headers, so only OpenRouter gets these
        if self.identify {
            builder = builder
                .header("HTTP-Referer", APP_REFERER)
                .header("X-Title", APP_TITLE);
        }
        builder.json(&body)
    }

    fn extract_content(&self, body: &Value) -> String {
        extract_openai_content(body)
    }
}

/**
 * \brief Anthropic Messages API.
 */
pub struct AnthropicAdapter {
    base_url: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        request: &CompletionRequest<'_>,
    ) -> reqwest::RequestBuilder {
        let body = json!({
            "model": request.model,
            "system": request.system,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": request.user}]}
            ]
        });
        client
            .post(&self.base_url)
            .header(CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
    }

    fn extract_content(&self, body: &Value) -> String {
        extract_anthropic_content(body)
    }
}

/**
 * \brief Pick the adapter for a profile's provider family.
 */
pub fn adapter_for(profile: &Profile) -> Box<dyn ProviderAdapter> {
    match profile.provider.family() {
        ProviderFamily::Anthropic => Box::new(AnthropicAdapter::new(
            profile.base_url.clone(),
            profile.api_key.clone(),
        )),
        ProviderFamily::OpenAiCompatible => Box::new(OpenAiAdapter::new(
            profile.base_url.clone(),
            profile.api_key.clone(),
            profile.provider,
        )),
    }
}

fn extract_openai_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_anthropic_content(v: &Value) -> String {
    v.get("content")
        .and_then(|c| c.get(0))
        .and_then(|item| item.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            model: "gpt-4o-mini",
            system: "sys",
            user: "usr",
            temperature: 0.2,
        }
    }

    fn body_json(req: &reqwest::Request) -> Value {
        let bytes = req.body().and_then(|b| b.as_bytes()).expect("buffered body");
        serde_json::from_slice(bytes).expect("json body")
    }

    #[test]
    fn test_openai_request_shape() {
        let client = reqwest::Client::new();
        let adapter = OpenAiAdapter::new("https://api.openai.com/v1/chat/completions", "sk-1", ProviderId::OpenAi);
        let req = adapter.build_request(&client, &request()).build().expect("build");
        assert_eq!(req.headers()["authorization"], "Bearer sk-1");
        assert!(req.headers().get("x-title").is_none());
        let body = body_json(&req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_openrouter_gets_identification_headers() {
        let client = reqwest::Client::new();
        let adapter = OpenAiAdapter::new("https://openrouter.ai/api/v1/chat/completions", "sk", ProviderId::OpenRouter);
        let req = adapter.build_request(&client, &request()).build().expect("build");
        assert!(req.headers().get("http-referer").is_some());
        assert_eq!(req.headers()["x-title"], APP_TITLE);
    }

    #[test]
    fn test_anthropic_request_shape() {
        let client = reqwest::Client::new();
        let adapter = AnthropicAdapter::new("https://api.anthropic.com/v1/messages", "sk-ant");
        let req = adapter.build_request(&client, &request()).build().expect("build");
        assert_eq!(req.headers()["x-api-key"], "sk-ant");
        assert_eq!(req.headers()["anthropic-version"], ANTHROPIC_VERSION);
        assert!(req.headers().get("authorization").is_none());
        let body = body_json(&req);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["content"][0]["text"], "usr");
    }

    #[test]
    fn test_extraction_tolerates_bad_envelopes() {
        let openai = OpenAiAdapter::new("http://x", "k", ProviderId::Custom);
        assert_eq!(
            openai.extract_content(&json!({"choices": [{"message": {"content": "hi"}}]})),
            "hi"
        );
        assert_eq!(openai.extract_content(&json!({"choices": []})), "");
        assert_eq!(openai.extract_content(&json!("nope")), "");

        let anthropic = AnthropicAdapter::new("http://x", "k");
        assert_eq!(
            anthropic.extract_content(&json!({"content": [{"type": "text", "text": "yo"}]})),
            "yo"
        );
        assert_eq!(anthropic.extract_content(&json!({"content": null})), "");
    }
}
