//! Chat relay: bridges one inbound request to one runtime call.
//!
//! Streaming callers get each fragment written to the response body as soon
//! as the runtime produces it. The status line is sent before the first
//! fragment, so an upstream failure after that point can only cut the body
//! short: a stream that ends without a clean close means the generation
//! failed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName},
    middleware,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Extension, Json, Router,
};
use chatbot_common::{ChatCompletion, ChatFragment, ChatRequest, FragmentStats};
use futures_util::{stream, Stream, StreamExt};

use super::parse_json;
use crate::auth::{require_auth, AuthUser};
use crate::error::{Error, Result};
use crate::runtime::FragmentStream;
use crate::AppState;

/// Build the relay router. Every route here sits behind the auth gate.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/localLLM", post(local_llm))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/// POST /api/v1/localLLM - relay a chat request to the model runtime.
async fn local_llm(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request: ChatRequest = parse_json(&body)?;
    request.validate()?;

    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        user_id = %user.id,
        model = %request.model,
        messages = request.messages.len(),
        stream = request.stream,
        "Relaying chat request to {} runtime",
        state.runtime.runtime_type()
    );

    let fragments = state.runtime.chat(&request).await.map_err(|e| {
        tracing::warn!(request_id = %request_id, error = %e, "Runtime call failed before streaming");
        e
    })?;
    let relay = RelayStream::new(request_id, fragments);

    if !request.stream {
        let completion = aggregate(request.model, relay).await?;
        return Ok(Json(completion).into_response());
    }

    if wants_event_stream(&headers) {
        return Ok(Sse::new(relay.map(fragment_event)).into_response());
    }

    Ok(text_response(relay))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Plain-text body carrying exactly the concatenated fragment contents.
fn text_response(relay: RelayStream) -> Response {
    let chunks = relay.filter_map(|item| async move {
        match item {
            Ok(fragment) if fragment.content.is_empty() => None,
            Ok(fragment) => Some(Ok(Bytes::from(fragment.content))),
            Err(e) => Some(Err(e)),
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// One SSE event per fragment; the final event carries the stats.
fn fragment_event(item: Result<ChatFragment>) -> Result<Event> {
    let fragment = item?;
    Event::default()
        .json_data(&fragment)
        .map_err(|e| Error::Internal(format!("failed to encode fragment: {}", e)))
}

/// Collect a whole response for non-streaming callers.
async fn aggregate(model: String, mut relay: RelayStream) -> Result<ChatCompletion> {
    let mut content = String::new();
    let mut stats = None;

    while let Some(fragment) = relay.next().await {
        let fragment = fragment?;
        content.push_str(&fragment.content);
        if fragment.done {
            stats = fragment.stats;
        }
    }

    Ok(ChatCompletion::new(model, content, stats))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Streaming,
    Finished,
    Failed,
}

/// Forwards runtime fragments in order and accounts for how the relay ended.
///
/// Ends right after the `done` fragment or the first error, releasing the
/// runtime stream at that point. If it is dropped while still streaming the
/// caller has gone away; the drop cancels the runtime call and is logged as
/// an aborted stream.
struct RelayStream {
    request_id: String,
    fragments: FragmentStream,
    state: RelayState,
    forwarded: usize,
    started: Instant,
}

impl RelayStream {
    fn new(request_id: String, fragments: FragmentStream) -> Self {
        Self {
            request_id,
            fragments,
            state: RelayState::Streaming,
            forwarded: 0,
            started: Instant::now(),
        }
    }

    fn release(&mut self) {
        self.fragments = Box::pin(stream::empty());
    }

    fn complete(&mut self, stats: Option<&FragmentStats>) {
        self.state = RelayState::Finished;
        self.release();
        tracing::info!(
            request_id = %self.request_id,
            fragments = self.forwarded,
            prompt_tokens = ?stats.and_then(|s| s.prompt_tokens),
            completion_tokens = ?stats.and_then(|s| s.completion_tokens),
            done_reason = ?stats.and_then(|s| s.done_reason.as_deref()),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Chat relay completed"
        );
    }

    fn fail(&mut self, error: &Error) {
        self.state = RelayState::Failed;
        self.release();
        tracing::error!(
            request_id = %self.request_id,
            fragments = self.forwarded,
            error = %error,
            "Runtime stream failed; terminating response"
        );
    }
}

impl Stream for RelayStream {
    type Item = Result<ChatFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.state != RelayState::Streaming {
            return Poll::Ready(None);
        }

        match ready!(self.fragments.as_mut().poll_next(cx)) {
            Some(Ok(fragment)) => {
                self.forwarded += 1;
                if fragment.done {
                    self.complete(fragment.stats.as_ref());
                }
                Poll::Ready(Some(Ok(fragment)))
            }
            Some(Err(e)) => {
                self.fail(&e);
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.complete(None);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if self.state == RelayState::Streaming {
            tracing::warn!(
                request_id = %self.request_id,
                fragments = self.forwarded,
                error = %Error::StreamAborted,
                "Cancelling runtime call"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn scripted(items: Vec<Result<ChatFragment>>) -> FragmentStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_relay_stops_after_done() {
        let relay = RelayStream::new(
            "r1".to_string(),
            scripted(vec![
                Ok(ChatFragment::delta("a")),
                Ok(ChatFragment::done(None)),
                Ok(ChatFragment::delta("ignored")),
            ]),
        );
        let items: Vec<_> = relay.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_relay_stops_after_error() {
        let relay = RelayStream::new(
            "r2".to_string(),
            scripted(vec![
                Ok(ChatFragment::delta("a")),
                Err(Error::Protocol("bad line".to_string())),
                Ok(ChatFragment::delta("b")),
            ]),
        );
        let items: Vec<_> = relay.collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_aggregate_concatenates_and_keeps_stats() {
        let stats = FragmentStats {
            completion_tokens: Some(3),
            ..Default::default()
        };
        let relay = RelayStream::new(
            "r3".to_string(),
            scripted(vec![
                Ok(ChatFragment::delta("Hel")),
                Ok(ChatFragment::delta("lo")),
                Ok(ChatFragment::done(Some(stats.clone()))),
            ]),
        );
        let completion = aggregate("m".to_string(), relay).await.unwrap();
        assert_eq!(completion.message.content, "Hello");
        assert_eq!(completion.stats, Some(stats));
    }

    #[tokio::test]
    async fn test_aggregate_propagates_error() {
        let relay = RelayStream::new(
            "r4".to_string(),
            scripted(vec![
                Ok(ChatFragment::delta("Hel")),
                Err(Error::Timeout("idle".to_string())),
            ]),
        );
        let err = aggregate("m".to_string(), relay).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_wants_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!wants_event_stream(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert!(wants_event_stream(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!wants_event_stream(&headers));
    }

    #[test]
    fn test_fragment_event_propagates_error() {
        assert!(fragment_event(Ok(ChatFragment::delta("x"))).is_ok());
        assert!(fragment_event(Err(Error::Connection("reset".to_string()))).is_err());
    }
}
