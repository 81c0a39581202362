use std::sync::Arc;

use async_trait::async_trait;
use rig::{
    client::CompletionClient as _,
    completion::Prompt,
    providers::{
        anthropic,
        gemini::{
            self,
            completion::gemini_api_types::{AdditionalParameters, GenerationConfig},
        },
        openai, xai,
    },
};
use serde_json::{Map, Value, json};

use crate::config::{ClientSettings, LlmProvider};
use crate::error::{Error, Result};

/// Anthropic requires `max_tokens`; rig only knows a default for a few model names.
const ANTHROPIC_MAX_TOKENS: u64 = 8_192;

/// Sampling knobs forwarded unchanged with every prompt of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParameters {
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl SamplingParameters {
    /// Temperature to send, if any. Anthropic refuses temperature and top_p together, so an
    /// explicit top_p takes over there while temperature is still at its default.
    pub fn temperature_for(&self, provider: LlmProvider) -> Option<f64> {
        let defaults = Self::default();
        let top_p_only = self.top_p != defaults.top_p && self.temperature == defaults.temperature;
        if provider == LlmProvider::Anthropic && top_p_only {
            None
        } else {
            Some(self.temperature)
        }
    }

    /// Request fields beyond temperature, shaped for the given provider's API.
    /// Knobs still at their defaults are left out, except that Gemini always gets a
    /// generation config because rig only applies temperature through it.
    pub fn additional_params(&self, provider: LlmProvider) -> Option<Value> {
        let defaults = Self::default();
        let top_p = (self.top_p != defaults.top_p).then_some(self.top_p);
        let frequency_penalty = (self.frequency_penalty != defaults.frequency_penalty)
            .then_some(self.frequency_penalty);
        let presence_penalty =
            (self.presence_penalty != defaults.presence_penalty).then_some(self.presence_penalty);

        match provider {
            LlmProvider::Openai | LlmProvider::Grok => {
                let mut params = Map::new();
                if let Some(top_p) = top_p {
                    params.insert("top_p".into(), json!(top_p));
                }
                if let Some(penalty) = frequency_penalty {
                    params.insert("frequency_penalty".into(), json!(penalty));
                }
                if let Some(penalty) = presence_penalty {
                    params.insert("presence_penalty".into(), json!(penalty));
                }
                (!params.is_empty()).then_some(Value::Object(params))
            }
            LlmProvider::Anthropic => top_p.map(|top_p| json!({ "top_p": top_p })),
            LlmProvider::Gemini => {
                let config = GenerationConfig {
                    temperature: Some(self.temperature),
                    max_output_tokens: None,
                    top_p,
                    frequency_penalty,
                    presence_penalty,
                    ..GenerationConfig::default()
                };
                serde_json::to_value(AdditionalParameters::default().with_config(config)).ok()
            }
        }
    }
}

/// The one capability the prompt loop needs from a completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, params: &SamplingParameters) -> Result<String>;
}

/// Concrete [`CompletionClient`] backed by `rig`.
#[derive(Clone)]
pub struct RigCompletionClient {
    inner: Arc<RigCompletionClientInner>,
}

struct RigCompletionClientInner {
    settings: ClientSettings,
    http_client: reqwest::Client,
}

impl RigCompletionClient {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(Error::Config("API key may not be empty".into()));
        }
        if settings.model.trim().is_empty() {
            return Err(Error::Config("Model identifier may not be empty".into()));
        }

        let http_client = build_http_client()?;
        Ok(Self {
            inner: Arc::new(RigCompletionClientInner {
                settings,
                http_client,
            }),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.inner.settings.provider
    }

    pub fn model(&self) -> &str {
        &self.inner.settings.model
    }

    fn completion_error(&self, details: impl Into<String>) -> Error {
        Error::Completion {
            provider: self.inner.settings.provider.as_str().to_string(),
            details: details.into(),
        }
    }
}

impl std::fmt::Debug for RigCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigCompletionClient")
            .field("provider", &self.inner.settings.provider)
            .field("model", &self.inner.settings.model)
            .finish()
    }
}

#[async_trait]
impl CompletionClient for RigCompletionClient {
    async fn complete(&self, prompt: &str, params: &SamplingParameters) -> Result<String> {
        let settings = &self.inner.settings;
        let model = settings.model.as_str();
        let preamble = settings.preamble.as_deref();
        let temperature = params.temperature_for(settings.provider);
        let extra = params.additional_params(settings.provider);

        match settings.provider {
            LlmProvider::Openai => {
                let mut builder = openai::Client::<reqwest::Client>::builder()
                    .api_key(&settings.api_key)
                    .http_client(self.inner.http_client.clone());
                if let Some(base_url) = settings.base_url.as_deref() {
                    builder = builder.base_url(base_url);
                }
                let client: openai::Client<reqwest::Client> = builder.build().map_err(|err| {
                    self.completion_error(format!("Failed to create client: {err}"))
                })?;
                // The Responses API has no penalty fields; Chat Completions takes all four knobs.
                let client = client.completions_api();

                let mut agent_builder = client.agent(model);
                if let Some(temperature) = temperature {
                    agent_builder = agent_builder.temperature(temperature);
                }
                if let Some(preamble) = preamble {
                    agent_builder = agent_builder.preamble(preamble);
                }
                if let Some(extra) = extra {
                    agent_builder = agent_builder.additional_params(extra);
                }
                agent_builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|err| self.completion_error(err.to_string()))
            }
            LlmProvider::Anthropic => {
                let client: anthropic::Client<reqwest::Client> =
                    anthropic::Client::<reqwest::Client>::builder()
                        .api_key(&settings.api_key)
                        .http_client(self.inner.http_client.clone())
                        .build()
                        .map_err(|err| {
                            self.completion_error(format!("Failed to create client: {err}"))
                        })?;

                let mut agent_builder = client.agent(model).max_tokens(ANTHROPIC_MAX_TOKENS);
                if let Some(temperature) = temperature {
                    agent_builder = agent_builder.temperature(temperature);
                }
                if let Some(preamble) = preamble {
                    agent_builder = agent_builder.preamble(preamble);
                }
                if let Some(extra) = extra {
                    agent_builder = agent_builder.additional_params(extra);
                }
                agent_builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|err| self.completion_error(err.to_string()))
            }
            LlmProvider::Gemini => {
                let client: gemini::Client<reqwest::Client> =
                    gemini::Client::<reqwest::Client>::builder()
                        .api_key(&settings.api_key)
                        .http_client(self.inner.http_client.clone())
                        .build()
                        .map_err(|err| {
                            self.completion_error(format!("Failed to create client: {err}"))
                        })?;

                let mut agent_builder = client.agent(model);
                if let Some(temperature) = temperature {
                    agent_builder = agent_builder.temperature(temperature);
                }
                if let Some(preamble) = preamble {
                    agent_builder = agent_builder.preamble(preamble);
                }
                if let Some(extra) = extra {
                    agent_builder = agent_builder.additional_params(extra);
                }
                agent_builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|err| self.completion_error(err.to_string()))
            }
            LlmProvider::Grok => {
                let client: xai::Client<reqwest::Client> =
                    xai::Client::<reqwest::Client>::builder()
                        .api_key(&settings.api_key)
                        .http_client(self.inner.http_client.clone())
                        .build()
                        .map_err(|err| {
                            self.completion_error(format!("Failed to create client: {err}"))
                        })?;

                let mut agent_builder = client.agent(model);
                if let Some(temperature) = temperature {
                    agent_builder = agent_builder.temperature(temperature);
                }
                if let Some(preamble) = preamble {
                    agent_builder = agent_builder.preamble(preamble);
                }
                if let Some(extra) = extra {
                    agent_builder = agent_builder.additional_params(extra);
                }
                agent_builder
                    .build()
                    .prompt(prompt)
                    .await
                    .map_err(|err| self.completion_error(err.to_string()))
            }
        }
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    // Proxy discovery through OS settings can panic in sandboxed macOS environments.
    // Set `PROMPTBATCH_ENABLE_SYSTEM_PROXY=1` to opt back in.
    let mut builder = reqwest::Client::builder();
    if std::env::var_os("PROMPTBATCH_ENABLE_SYSTEM_PROXY").is_none() {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|err| Error::Config(format!("Failed to build HTTP client: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn settings(api_key: &str, model: &str) -> ClientSettings {
        ClientSettings {
            provider: LlmProvider::Openai,
            model: model.into(),
            api_key: api_key.into(),
            preamble: None,
            base_url: None,
        }
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = RigCompletionClient::new(settings("   ", "model")).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn rejects_empty_model() {
        let err = RigCompletionClient::new(settings("key", "   ")).unwrap_err();
        assert!(err.to_string().contains("Model"));
    }

    fn tuned() -> SamplingParameters {
        SamplingParameters {
            temperature: 0.25,
            top_p: 0.5,
            frequency_penalty: 0.5,
            presence_penalty: -0.5,
        }
    }

    /// Accepts one HTTP request, answers with `reply`, and returns the request line and body.
    async fn answer_once(listener: TcpListener, reply: &str) -> (String, Value) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let body_start = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..body_start]).into_owned();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < body_start + length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request body");
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
            reply.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;

        let request_line = head.lines().next().unwrap_or_default().to_string();
        let body = serde_json::from_slice(&buf[body_start..body_start + length]).unwrap();
        (request_line, body)
    }

    const CHAT_REPLY: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","created":0,"model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#;

    async fn openai_request_body(params: SamplingParameters) -> (String, Value) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = RigCompletionClient::new(ClientSettings {
            base_url: Some(format!("http://{addr}/v1")),
            ..settings("sk-test", "gpt-4o-mini")
        })
        .unwrap();

        let (captured, _) = tokio::join!(
            answer_once(listener, CHAT_REPLY),
            client.complete("What is 2+2?", &params)
        );
        captured
    }

    #[tokio::test]
    async fn openai_request_carries_every_sampling_knob() {
        let (request_line, body) = openai_request_body(tuned()).await;

        assert!(request_line.contains("/v1/chat/completions"), "{request_line}");
        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert_eq!(body["temperature"], json!(0.25));
        assert_eq!(body["top_p"], json!(0.5));
        assert_eq!(body["frequency_penalty"], json!(0.5));
        assert_eq!(body["presence_penalty"], json!(-0.5));
    }

    #[tokio::test]
    async fn openai_request_omits_knobs_left_at_defaults() {
        let (_, body) = openai_request_body(SamplingParameters::default()).await;

        assert_eq!(body["temperature"], json!(1.0));
        assert!(body.get("top_p").is_none(), "{body}");
        assert!(body.get("frequency_penalty").is_none(), "{body}");
        assert!(body.get("presence_penalty").is_none(), "{body}");
    }

    #[test]
    fn anthropic_defaults_send_temperature_alone() {
        let params = SamplingParameters::default();
        assert_eq!(params.temperature_for(LlmProvider::Anthropic), Some(1.0));
        assert!(params.additional_params(LlmProvider::Anthropic).is_none());
    }

    #[test]
    fn anthropic_explicit_top_p_replaces_default_temperature() {
        let params = SamplingParameters {
            top_p: 0.5,
            ..SamplingParameters::default()
        };
        assert_eq!(params.temperature_for(LlmProvider::Anthropic), None);
        assert_eq!(
            params.additional_params(LlmProvider::Anthropic),
            Some(json!({ "top_p": 0.5 }))
        );
        assert_eq!(params.temperature_for(LlmProvider::Openai), Some(1.0));
    }

    #[test]
    fn anthropic_keeps_both_when_both_are_set() {
        let params = tuned();
        assert_eq!(params.temperature_for(LlmProvider::Anthropic), Some(0.25));
        assert_eq!(
            params.additional_params(LlmProvider::Anthropic),
            Some(json!({ "top_p": 0.5 }))
        );
    }

    #[test]
    fn gemini_nests_knobs_in_generation_config() {
        let extra = tuned().additional_params(LlmProvider::Gemini).unwrap();
        let config = &extra["generationConfig"];
        assert_eq!(config["temperature"], json!(0.25));
        assert_eq!(config["topP"], json!(0.5));
        assert_eq!(config["frequencyPenalty"], json!(0.5));
        assert_eq!(config["presencePenalty"], json!(-0.5));
        assert!(config.get("maxOutputTokens").is_none(), "{config}");

        // rig reads the same shape back when it builds the request.
        let parsed: AdditionalParameters = serde_json::from_value(extra).unwrap();
        let parsed = parsed.generation_config.unwrap();
        assert_eq!(parsed.top_p, Some(0.5));
        assert_eq!(parsed.presence_penalty, Some(-0.5));
    }

    #[test]
    fn gemini_defaults_still_carry_temperature() {
        let extra = SamplingParameters::default()
            .additional_params(LlmProvider::Gemini)
            .unwrap();
        assert_eq!(extra["generationConfig"], json!({ "temperature": 1.0 }));
    }
}
