//! Ollama runtime client.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatbot_common::{ChatFragment, ChatRequest, FragmentStats};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FragmentStream, ModelRuntime, NdjsonDecoder};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// Port Ollama listens on when the configured address does not name one.
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Ollama chat runtime.
///
/// Talks to `POST /api/chat` and decodes its newline-delimited JSON stream
/// into fragments.
pub struct OllamaRuntime {
    http_client: Client,
    base_url: String,
    idle_timeout: Duration,
}

impl OllamaRuntime {
    /// Build the client. Fails if `base_url` is not a usable runtime address.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;

        // One connection per chat call: idle connections are never pooled, so
        // finishing or dropping a stream closes its socket.
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Turn the configured runtime address into a base URL.
///
/// A bare host (`192.168.1.5`, `localhost:11434`) gets `http://`, and the
/// Ollama port when none is given. An explicit scheme is kept as written.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let has_scheme = trimmed.contains("://");
    let candidate = if has_scheme {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let invalid = |reason: &str| {
        Error::Internal(format!("invalid runtime address {:?}: {}", raw, reason))
    };

    let mut url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if !has_scheme && url.port().is_none() {
        url.set_port(Some(DEFAULT_OLLAMA_PORT))
            .map_err(|_| invalid("cannot set port"))?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions<'a>>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, Value>,
}

impl<'a> From<&'a ChatRequest> for OllamaChatRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        let messages = request
            .messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let opts = &request.options;
        let options = if opts.is_empty() {
            None
        } else {
            Some(OllamaOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
                seed: opts.seed,
                top_p: opts.top_p,
                top_k: opts.top_k,
                stop: opts.stop.as_deref(),
                extra: &opts.extra,
            })
        };

        Self {
            model: &request.model,
            messages,
            // Always streamed upstream, so the idle timeout bounds gaps
            // between fragments even for callers that want one response.
            stream: true,
            options,
        }
    }
}

/// One line of the `/api/chat` response body.
#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    load_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

fn nanos_to_secs(nanos: Option<u64>) -> Option<f64> {
    nanos.map(|n| n as f64 / 1e9)
}

/// Decode one NDJSON line into a fragment.
fn parse_chunk(line: &[u8]) -> Result<ChatFragment> {
    let chunk: OllamaChatChunk = serde_json::from_slice(line).map_err(|e| {
        Error::Protocol(format!("{} in {:?}", e, String::from_utf8_lossy(line)))
    })?;

    if let Some(error) = chunk.error {
        return Err(Error::Runtime(error));
    }

    let done = chunk
        .done
        .ok_or_else(|| Error::Protocol("fragment is missing the done flag".to_string()))?;

    let stats = done.then(|| FragmentStats {
        prompt_tokens: chunk.prompt_eval_count,
        completion_tokens: chunk.eval_count,
        done_reason: chunk.done_reason,
        load_duration_secs: nanos_to_secs(chunk.load_duration),
        prompt_eval_duration_secs: nanos_to_secs(chunk.prompt_eval_duration),
        eval_duration_secs: nanos_to_secs(chunk.eval_duration),
        total_duration_secs: nanos_to_secs(chunk.total_duration),
    });

    Ok(ChatFragment {
        content: chunk.message.map(|m| m.content).unwrap_or_default(),
        done,
        stats,
    })
}

/// Pull a readable message out of an error response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<OllamaErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else if err.is_builder() {
        Error::Internal(err.to_string())
    } else {
        Error::Connection(err.to_string())
    }
}

// ============================================================================
// Fragment stream
// ============================================================================

/// Reader state behind a `FragmentStream`.
///
/// `body` holds the live connection; it is set to `None` as soon as the
/// stream reaches a terminal item so the socket is released without waiting
/// for the consumer to drop the stream.
struct FragmentReader {
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    decoder: NdjsonDecoder,
    lines: VecDeque<Vec<u8>>,
    idle_timeout: Duration,
}

impl FragmentReader {
    fn finish(&mut self) {
        self.body = None;
        self.lines.clear();
    }

    async fn next_fragment(&mut self) -> Option<Result<ChatFragment>> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                let result = parse_chunk(&line);
                if !matches!(result, Ok(ChatFragment { done: false, .. })) {
                    self.finish();
                }
                return Some(result);
            }

            let body = self.body.as_mut()?;
            let next = tokio::time::timeout(self.idle_timeout, body.next()).await;
            match next {
                Err(_) => {
                    self.finish();
                    return Some(Err(Error::Timeout(format!(
                        "no fragment from runtime within {}s",
                        self.idle_timeout.as_secs_f64()
                    ))));
                }
                Ok(Some(Ok(chunk))) => match self.decoder.push(&chunk) {
                    Ok(lines) => self.lines.extend(lines),
                    Err(e) => {
                        self.finish();
                        return Some(Err(e));
                    }
                },
                Ok(Some(Err(e))) => {
                    self.finish();
                    return Some(Err(Error::Connection(format!(
                        "runtime stream interrupted: {}",
                        e
                    ))));
                }
                Ok(None) => {
                    if let Some(line) = self.decoder.finish() {
                        self.lines.push_back(line);
                        continue;
                    }
                    self.finish();
                    return Some(Err(Error::Connection(
                        "runtime closed the stream before completion".to_string(),
                    )));
                }
            }
        }
    }
}

// ============================================================================
// ModelRuntime implementation
// ============================================================================

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    fn runtime_type(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::from(request);

        tracing::debug!(
            "Sending chat request to Ollama: {} model={} stream={}",
            url,
            request.model,
            request.stream
        );

        let send = self.http_client.post(&url).json(&body).send();
        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "runtime did not respond within {}s",
                    self.idle_timeout.as_secs_f64()
                ))
            })?
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = tokio::time::timeout(self.idle_timeout, response.text())
                .await
                .ok()
                .and_then(|body| body.ok())
                .unwrap_or_default();
            let message = error_message(&text);
            tracing::debug!("Ollama returned {}: {}", status, message);
            return Err(if status == StatusCode::NOT_FOUND {
                Error::ModelNotFound(request.model.clone())
            } else {
                Error::Runtime(format!("{}: {}", status, message))
            });
        }

        let reader = FragmentReader {
            body: Some(response.bytes_stream().boxed()),
            decoder: NdjsonDecoder::new(),
            lines: VecDeque::new(),
            idle_timeout: self.idle_timeout,
        };

        let fragments = stream::unfold(reader, |mut reader| async move {
            let item = reader.next_fragment().await?;
            Some((item, reader))
        });

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbot_common::{ChatMessage, SamplingOptions};

    fn runtime_config(base_url: &str) -> RuntimeConfig {
        RuntimeConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_runtime_url_normalization() {
        let runtime = OllamaRuntime::new(&runtime_config("http://localhost:11434/")).unwrap();
        assert_eq!(runtime.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_bare_runtime_address_gets_scheme_and_port() {
        let cases = [
            ("192.168.1.5", "http://192.168.1.5:11434"),
            ("127.0.0.1", "http://127.0.0.1:11434"),
            ("localhost:11434", "http://localhost:11434"),
            ("127.0.0.1:9000/", "http://127.0.0.1:9000"),
            (" gpu-box ", "http://gpu-box:11434"),
            ("https://llm.example.com", "https://llm.example.com"),
            ("http://10.0.0.2:8080/ollama/", "http://10.0.0.2:8080/ollama"),
        ];
        for (raw, expected) in cases {
            let runtime = OllamaRuntime::new(&runtime_config(raw)).unwrap();
            assert_eq!(runtime.base_url(), expected, "address {:?}", raw);
        }
    }

    #[test]
    fn test_unusable_runtime_address_rejected_at_construction() {
        for raw in ["", "http://", "ftp://host:21", "host:notaport"] {
            let result = OllamaRuntime::new(&runtime_config(raw));
            assert!(matches!(result, Err(Error::Internal(_))), "address {:?}", raw);
        }
    }

    #[test]
    fn test_request_mapping_renames_max_tokens() {
        let options: SamplingOptions =
            serde_json::from_str(r#"{"temperature": 2, "num_predict": -1, "seed": 123, "num_predict": 512, "mirostat": 1}"#)
                .unwrap();
        let request = ChatRequest::new(
            "llama3.2:3b",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        )
        .with_options(options);

        let json = serde_json::to_value(OllamaChatRequest::from(&request)).unwrap();
        assert_eq!(json["model"], "llama3.2:3b");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["options"]["seed"], 123);
        assert_eq!(json["options"]["mirostat"], 1);
        assert!(json["options"].get("max_tokens").is_none());
    }

    #[test]
    fn test_request_mapping_without_options() {
        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")]).with_stream(false);
        let json = serde_json::to_value(OllamaChatRequest::from(&request)).unwrap();
        assert!(json.get("options").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_parse_partial_chunk() {
        let line = br#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        let fragment = parse_chunk(line).unwrap();
        assert_eq!(fragment, ChatFragment::delta("Hel"));
    }

    #[test]
    fn test_parse_final_chunk_with_stats() {
        let line = br#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":26,"eval_count":3,"total_duration":2500000000,"eval_duration":500000000}"#;
        let fragment = parse_chunk(line).unwrap();
        assert!(fragment.done);
        let stats = fragment.stats.unwrap();
        assert_eq!(stats.prompt_tokens, Some(26));
        assert_eq!(stats.completion_tokens, Some(3));
        assert_eq!(stats.done_reason.as_deref(), Some("stop"));
        assert_eq!(stats.total_duration_secs, Some(2.5));
        assert_eq!(stats.eval_duration_secs, Some(0.5));
        assert!(stats.load_duration_secs.is_none());
    }

    #[test]
    fn test_parse_error_record() {
        let err = parse_chunk(br#"{"error":"out of memory"}"#).unwrap_err();
        assert!(matches!(err, Error::Runtime(ref m) if m == "out of memory"));
    }

    #[test]
    fn test_parse_malformed_chunk() {
        assert!(matches!(parse_chunk(b"{not json"), Err(Error::Protocol(_))));
        assert!(matches!(parse_chunk(br#"{"message":{"content":"x"}}"#), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":"model \"x\" not found, try pulling it first"}"#),
            "model \"x\" not found, try pulling it first"
        );
        assert_eq!(error_message("  plain text \n"), "plain text");
    }
}
