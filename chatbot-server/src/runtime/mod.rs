//! Model runtime abstraction layer.
//!
//! The relay only sees the `ModelRuntime` trait: it hands over a
//! `ChatRequest` and consumes a stream of `ChatFragment`s, without knowing
//! the wire protocol spoken to the inference server.

mod ndjson;
mod ollama;

pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaRuntime;

use std::pin::Pin;

use async_trait::async_trait;
use chatbot_common::{ChatFragment, ChatRequest};
use futures_util::Stream;

use crate::error::Result;

/// Fragments of one chat response, in generation order.
///
/// The stream owns the underlying connection. It ends after the fragment
/// with `done = true`; a failure is yielded as a final `Err` item. Dropping
/// the stream early releases the connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ChatFragment>> + Send>>;

/// A remote inference server that can run chat completions.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Identifier of the runtime kind (e.g. "ollama"), used in logs.
    fn runtime_type(&self) -> &'static str;

    /// Submit a chat request and return its fragment stream.
    ///
    /// Failures that happen before the first fragment (unreachable host,
    /// unknown model, error status) are returned here rather than inside
    /// the stream.
    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream>;
}
