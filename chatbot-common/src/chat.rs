//! Chat request and stream fragment types.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sentinel for `max_tokens` meaning "generate until the model stops".
pub const UNBOUNDED_TOKENS: i64 = -1;

/// Generation options forwarded to the runtime.
///
/// Deserialization walks the JSON object in document order and assigns each
/// key as it is seen, so a key that appears twice keeps its last value. The
/// runtime-native `num_predict` is accepted as an alias of `max_tokens` and
/// takes part in the same last-write-wins rule. Keys that are not modelled
/// here land in `extra` and are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate; [`UNBOUNDED_TOKENS`] for no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SamplingOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl<'de> Deserialize<'de> for SamplingOptions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(SamplingOptionsVisitor)
    }
}

struct SamplingOptionsVisitor;

impl<'de> Visitor<'de> for SamplingOptionsVisitor {
    type Value = SamplingOptions;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of sampling options")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut options = SamplingOptions::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "temperature" => options.temperature = map.next_value()?,
                "max_tokens" | "num_predict" => options.max_tokens = map.next_value()?,
                "seed" => options.seed = map.next_value()?,
                "top_p" => options.top_p = map.next_value()?,
                "top_k" => options.top_k = map.next_value()?,
                "stop" => options.stop = map.next_value()?,
                _ => {
                    let value: Value = map.next_value()?;
                    options.extra.insert(key, value);
                }
            }
        }

        Ok(options)
    }
}

fn default_stream() -> bool {
    true
}

/// Inbound chat request, built per call and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "SamplingOptions::is_empty")]
    pub options: SamplingOptions,
    /// Stream fragments as they arrive (default) or return one aggregated response.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

/// A request that breaks one of the [`ChatRequest`] invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidRequest(pub String);

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: SamplingOptions::default(),
            stream: true,
        }
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.model.trim().is_empty() {
            return Err(InvalidRequest("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(InvalidRequest("messages must not be empty".to_string()));
        }
        if let Some(max_tokens) = self.options.max_tokens {
            if max_tokens < UNBOUNDED_TOKENS {
                return Err(InvalidRequest(format!(
                    "max_tokens must be -1 (unbounded) or non-negative, got {}",
                    max_tokens
                )));
            }
        }
        Ok(())
    }
}

/// Aggregate metadata reported by the runtime on the final fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    /// Why generation stopped (e.g. "stop", "length").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_secs: Option<f64>,
}

/// One incremental piece of a streamed chat response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatFragment {
    pub content: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FragmentStats>,
}

impl ChatFragment {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            stats: None,
        }
    }

    pub fn done(stats: Option<FragmentStats>) -> Self {
        Self {
            content: String::new(),
            done: true,
            stats,
        }
    }
}

/// Aggregated response returned to non-streaming callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub model: String,
    pub message: ChatMessage,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FragmentStats>,
}

impl ChatCompletion {
    pub fn new(model: String, content: String, stats: Option<FragmentStats>) -> Self {
        Self {
            model,
            message: ChatMessage::assistant(content),
            done: true,
            stats,
        }
    }
}
