//! Model client with retry, backoff, and model failover.
//!
//! All semantic work in the pipeline goes through [`ModelClient::chat`] /
//! [`ModelClient::chat_json`]. The wire protocol is behind the [`Transport`]
//! trait so the retry/failover state machine is testable without a network.

use std::time::Duration;

use tracing::{debug, warn};

use bidforge_shared::{BidforgeError, DashscopeConfig, Message, Result};

/// Pause inserted after every [`PACE_EVERY`]th successful request.
const PACE_EVERY: u64 = 2;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Failure classes a transport distinguishes. Everything the client needs to
/// know to pick between failover and retry.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The service rejected the request for this model (schema/validation
    /// class). Triggers failover to the next model, never a retry.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Network error, rate limit, server error, or malformed success
    /// envelope. Retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Resolved per-request sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChatParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Per-call overrides of the client's instance defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Delivers one message-based request to the generation service.
///
/// The pipeline is single-threaded, so implementations need no auto-trait
/// bounds on the returned futures.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(
        &self,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> std::result::Result<String, TransportError>;
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Constructor input for [`ModelClient`]. Env-var resolution happens at the
/// CLI entry point, never here.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Candidate model identifiers, tried in order on request rejection.
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total attempts per request before a transient failure becomes fatal.
    pub max_retries: u32,
    /// Courtesy pause inserted after every second successful request.
    pub pace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            models: vec!["qwen-plus".into()],
            temperature: 0.2,
            max_tokens: 4000,
            max_retries: 3,
            pace: Duration::from_secs(1),
        }
    }
}

impl From<&DashscopeConfig> for ClientConfig {
    fn from(config: &DashscopeConfig) -> Self {
        Self {
            models: config.models.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            pace: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// ModelClient
// ---------------------------------------------------------------------------

/// Rotation and pacing state, owned by the client and mutated only through
/// its methods.
#[derive(Debug, Default)]
struct ClientState {
    /// Index of the currently-active model. Advances permanently on
    /// request rejection.
    active_model: usize,
    /// Successful requests issued so far, for the pacing rule.
    successes: u64,
}

/// Client for the external text-generation service.
///
/// Not safe for uncoordinated concurrent use: failover mutates shared state,
/// so all methods take `&mut self`.
pub struct ModelClient<T> {
    transport: T,
    config: ClientConfig,
    state: ClientState,
}

impl<T: Transport> ModelClient<T> {
    /// Create a client over the given transport. Fails if no models are
    /// configured.
    pub fn new(transport: T, config: ClientConfig) -> Result<Self> {
        if config.models.is_empty() {
            return Err(BidforgeError::config("model list must not be empty"));
        }
        Ok(Self {
            transport,
            config,
            state: ClientState::default(),
        })
    }

    /// The model identifier the next request will target.
    pub fn active_model(&self) -> &str {
        &self.config.models[self.state.active_model]
    }

    /// Access the underlying transport (for test inspection).
    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Send chat messages to the service and return the response text.
    ///
    /// Request rejection advances to the next configured model and resends
    /// immediately (not counted against the retry budget); transient failures
    /// are retried with `2^attempt` seconds of backoff up to `max_retries`
    /// total attempts.
    pub async fn chat(&mut self, messages: &[Message], opts: ChatOptions) -> Result<String> {
        let params = ChatParams {
            temperature: opts.temperature.unwrap_or(self.config.temperature),
            max_tokens: opts.max_tokens.unwrap_or(self.config.max_tokens),
        };

        let mut attempt: u32 = 0;
        loop {
            let model = &self.config.models[self.state.active_model];
            match self.transport.send(model, messages, &params).await {
                Ok(text) => {
                    self.state.successes += 1;
                    if self.state.successes % PACE_EVERY == 0 {
                        tokio::time::sleep(self.config.pace).await;
                    }
                    return Ok(text);
                }
                Err(TransportError::BadRequest(msg)) => {
                    warn!(model = %model, error = %msg, "model rejected request, failing over");
                    if self.state.active_model + 1 >= self.config.models.len() {
                        return Err(BidforgeError::ModelsExhausted { last_error: msg });
                    }
                    self.state.active_model += 1;
                }
                Err(TransportError::Transient(msg)) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        return Err(BidforgeError::Transport(msg));
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    debug!(
                        model = %model,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %msg,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Call [`chat`](Self::chat) and parse the result strictly as JSON.
    ///
    /// Parse failure is a distinct [`BidforgeError::InvalidJson`] carrying the
    /// raw text — no silent coercion, no repair here (the cached helpers own
    /// the single-repair policy).
    pub async fn chat_json(
        &mut self,
        messages: &[Message],
        opts: ChatOptions,
    ) -> Result<serde_json::Value> {
        let text = self.chat(messages, opts).await?;
        serde_json::from_str(&text).map_err(|e| BidforgeError::InvalidJson {
            message: e.to_string(),
            raw: text,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("bidforge/", env!("CARGO_PKG_VERSION"));

/// Path of the text-generation endpoint under the service base URL.
const GENERATION_PATH: &str = "services/aigc/text-generation/generation";

/// Production transport posting generation requests over HTTPS.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: String,
}

impl HttpTransport {
    /// Build a transport for the given service base URL and bearer key.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                BidforgeError::Transport(format!("failed to build HTTP client: {e}"))
            })?;

        let endpoint = url::Url::parse(&format!(
            "{}/{GENERATION_PATH}",
            base_url.trim_end_matches('/')
        ))
        .map_err(|e| BidforgeError::config(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> std::result::Result<String, TransportError> {
        let body = serde_json::json!({
            "model": model,
            "input": { "messages": messages },
            "parameters": {
                "temperature": params.temperature,
                "max_tokens": params.max_tokens,
            },
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(TransportError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::BadRequest(format!("HTTP {status}: {detail}")));
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("invalid response body: {e}")))?;

        // The service answers with either a flat text envelope or a
        // choices/message envelope depending on model and result format.
        if let Some(text) = envelope.pointer("/output/text").and_then(|v| v.as_str()) {
            return Ok(text.to_string());
        }
        if let Some(text) = envelope
            .pointer("/output/choices/0/message/content")
            .and_then(|v| v.as_str())
        {
            return Ok(text.to_string());
        }

        let mut raw = envelope.to_string();
        raw.truncate(200);
        Err(TransportError::Transient(format!(
            "unexpected response envelope: {raw}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn test_config(models: &[&str]) -> ClientConfig {
        ClientConfig {
            models: models.iter().map(|m| m.to_string()).collect(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chat_returns_response_text() {
        let transport = ScriptedTransport::new([Ok("你好".to_string())]);
        let mut client = ModelClient::new(transport, test_config(&["m1"])).unwrap();

        let text = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "你好");
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_fails_over_to_next_model() {
        let transport = ScriptedTransport::new([
            Err(TransportError::BadRequest("HTTP 400".into())),
            Ok("from m2".to_string()),
        ]);
        let mut client = ModelClient::new(transport, test_config(&["m1", "m2"])).unwrap();

        let text = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "from m2");
        assert_eq!(client.active_model(), "m2");

        let models = client.transport().models_called();
        assert_eq!(models, vec!["m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_is_permanent_across_calls() {
        let transport = ScriptedTransport::new([
            Err(TransportError::BadRequest("HTTP 400".into())),
            Ok("one".to_string()),
            Ok("two".to_string()),
        ]);
        let mut client = ModelClient::new(transport, test_config(&["m1", "m2"])).unwrap();

        client
            .chat(&[Message::user("a")], ChatOptions::default())
            .await
            .unwrap();
        client
            .chat(&[Message::user("b")], ChatOptions::default())
            .await
            .unwrap();

        // Second call never touches m1 again.
        assert_eq!(client.transport().models_called(), vec!["m1", "m2", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_all_models_is_fatal() {
        let transport = ScriptedTransport::new([
            Err(TransportError::BadRequest("bad m1".into())),
            Err(TransportError::BadRequest("bad m2".into())),
        ]);
        let mut client = ModelClient::new(transport, test_config(&["m1", "m2"])).unwrap();

        let err = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();
        match err {
            BidforgeError::ModelsExhausted { last_error } => {
                assert_eq!(last_error, "bad m2");
            }
            other => panic!("expected ModelsExhausted, got: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_with_backoff() {
        let transport = ScriptedTransport::new([
            Err(TransportError::Transient("connection reset".into())),
            Ok("recovered".to_string()),
        ]);
        let mut client = ModelClient::new(transport, test_config(&["m1"])).unwrap();

        let text = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(client.transport().call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_surfaces_underlying_failure() {
        let transport = ScriptedTransport::new([
            Err(TransportError::Transient("timeout 1".into())),
            Err(TransportError::Transient("timeout 2".into())),
            Err(TransportError::Transient("timeout 3".into())),
        ]);
        let config = ClientConfig {
            max_retries: 3,
            ..test_config(&["m1"])
        };
        let mut client = ModelClient::new(transport, config).unwrap();

        let err = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();
        match err {
            BidforgeError::Transport(msg) => assert_eq!(msg, "timeout 3"),
            other => panic!("expected Transport, got: {other}"),
        }
        assert_eq!(client.transport().call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_does_not_consume_retry_budget() {
        // One rejection, then max_retries-1 transient failures, then success:
        // must still succeed because the rejection is not an attempt.
        let transport = ScriptedTransport::new([
            Err(TransportError::BadRequest("HTTP 400".into())),
            Err(TransportError::Transient("timeout".into())),
            Err(TransportError::Transient("timeout".into())),
            Ok("ok".to_string()),
        ]);
        let config = ClientConfig {
            max_retries: 3,
            ..test_config(&["m1", "m2"])
        };
        let mut client = ModelClient::new(transport, config).unwrap();

        let text = client
            .chat(&[Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_json_parses_strictly() {
        let transport = ScriptedTransport::new([
            Ok(r#"{"score": 0.7}"#.to_string()),
            Ok("not json at all".to_string()),
        ]);
        let mut client = ModelClient::new(transport, test_config(&["m1"])).unwrap();

        let value = client
            .chat_json(&[Message::user("score")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(value["score"], 0.7);

        let err = client
            .chat_json(&[Message::user("score")], ChatOptions::default())
            .await
            .unwrap_err();
        match err {
            BidforgeError::InvalidJson { raw, .. } => assert_eq!(raw, "not json at all"),
            other => panic!("expected InvalidJson, got: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_options_override_defaults() {
        let transport = ScriptedTransport::new([Ok("ok".to_string())]);
        let mut client = ModelClient::new(transport, test_config(&["m1"])).unwrap();

        client
            .chat(
                &[Message::user("hi")],
                ChatOptions {
                    temperature: Some(0.9),
                    max_tokens: Some(128),
                },
            )
            .await
            .unwrap();

        let call = &client.transport().calls()[0];
        assert_eq!(call.params.temperature, 0.9);
        assert_eq!(call.params.max_tokens, 128);
    }

    #[test]
    fn empty_model_list_is_a_config_error() {
        let transport = ScriptedTransport::empty();
        let config = ClientConfig {
            models: vec![],
            ..ClientConfig::default()
        };
        assert!(ModelClient::new(transport, config).is_err());
    }

    // -- HTTP transport against a mock server --------------------------------

    #[tokio::test]
    async fn http_transport_reads_flat_text_envelope() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path(
                "/services/aigc/text-generation/generation",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"output": {"text": "answer"}}),
            ))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "test-key").unwrap();
        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 100,
        };
        let text = transport
            .send("qwen-plus", &[Message::user("q")], &params)
            .await
            .unwrap();
        assert_eq!(text, "answer");
    }

    #[tokio::test]
    async fn http_transport_reads_choices_envelope() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({
                    "output": {"choices": [{"message": {"role": "assistant", "content": "via choices"}}]}
                }),
            ))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "test-key").unwrap();
        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 100,
        };
        let text = transport
            .send("qwen-plus", &[Message::user("q")], &params)
            .await
            .unwrap();
        assert_eq!(text, "via choices");
    }

    #[tokio::test]
    async fn http_transport_classifies_client_errors_as_bad_request() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(400).set_body_string("invalid model"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "test-key").unwrap();
        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 100,
        };
        let err = transport
            .send("bogus-model", &[Message::user("q")], &params)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::BadRequest(_)));
    }

    #[tokio::test]
    async fn http_transport_classifies_server_errors_as_transient() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "test-key").unwrap();
        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 100,
        };
        let err = transport
            .send("qwen-plus", &[Message::user("q")], &params)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Transient(_)));
    }

    #[tokio::test]
    async fn http_transport_rejects_malformed_envelope_as_transient() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"output": {"unexpected": true}}),
            ))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "test-key").unwrap();
        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 100,
        };
        let err = transport
            .send("qwen-plus", &[Message::user("q")], &params)
            .await
            .unwrap_err();
        match err {
            TransportError::Transient(msg) => assert!(msg.contains("envelope")),
            other => panic!("expected Transient, got: {other}"),
        }
    }
}
