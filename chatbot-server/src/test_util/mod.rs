//! Helpers shared by unit and integration tests.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chatbot_common::{ChatFragment, ChatRequest, FragmentStats};
use futures_util::{stream, Stream, StreamExt};

use crate::config::{
    AuthConfig, Config, DatabaseConfig, LoggingConfig, RuntimeConfig, ServerConfig,
};
use crate::error::{Error, Result};
use crate::models::user::NewUser;
use crate::runtime::{FragmentStream, ModelRuntime};
use crate::users::password::hash_password;
use crate::users::SqliteUserStore;
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-secret";
pub const TEST_PASSWORD: &str = "password123";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        runtime: RuntimeConfig {
            base_url: "http://127.0.0.1:11434".to_string(),
            connect_timeout_secs: 2,
            idle_timeout_secs: 5,
        },
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            token_ttl_secs: 3600,
        },
        database: DatabaseConfig {
            path: ":memory:".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

/// State backed by an in-memory user store and the given runtime.
pub fn test_state(runtime: Arc<dyn ModelRuntime>) -> Arc<AppState> {
    let users = SqliteUserStore::new(":memory:").expect("in-memory user store");
    Arc::new(AppState::new(test_config(), runtime, Arc::new(users)))
}

/// Register a user directly in the store and return a bearer token for it.
pub fn register_user(state: &AppState, email: &str) -> String {
    let user = state
        .users
        .create_user(NewUser {
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: email.to_string(),
            password_hash: hash_password(TEST_PASSWORD).expect("hash test password"),
            last_session_ip: None,
        })
        .expect("create test user");
    state
        .auth
        .issue_token(&user.id, &user.email)
        .expect("issue test token")
}

/// How a scripted fragment stream ends after its deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Final `done` fragment carrying stats.
    Done,
    /// Connection lost; yields a `Connection` error.
    ConnectionLost,
    /// Never produces another item.
    Hang,
}

/// Failure returned by `chat` before any fragment is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailure {
    Unreachable,
    ModelNotFound,
}

/// In-process runtime that replays a fixed script.
pub struct ScriptedRuntime {
    deltas: Vec<String>,
    ending: Ending,
    start_failure: Option<StartFailure>,
    calls: AtomicUsize,
    dropped: Arc<AtomicUsize>,
}

impl ScriptedRuntime {
    pub fn new(deltas: &[&str], ending: Ending) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            ending,
            start_failure: None,
            calls: AtomicUsize::new(0),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(failure: StartFailure) -> Self {
        let mut runtime = Self::new(&[], Ending::Done);
        runtime.start_failure = Some(failure);
        runtime
    }

    /// Number of `chat` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of fragment streams dropped before their `done` fragment or error.
    pub fn dropped_streams(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn script(&self) -> FragmentStream {
        let deltas = stream::iter(
            self.deltas
                .clone()
                .into_iter()
                .map(|d| Ok(ChatFragment::delta(d))),
        );
        let completion_tokens = self.deltas.len() as u32;

        let tail: FragmentStream = match self.ending {
            Ending::Done => Box::pin(stream::once(async move {
                Ok(ChatFragment::done(Some(FragmentStats {
                    prompt_tokens: Some(4),
                    completion_tokens: Some(completion_tokens),
                    done_reason: Some("stop".to_string()),
                    ..Default::default()
                })))
            })),
            Ending::ConnectionLost => Box::pin(stream::once(async {
                Err(Error::Connection("runtime stream interrupted".to_string()))
            })),
            Ending::Hang => Box::pin(stream::pending()),
        };

        Box::pin(deltas.chain(tail))
    }
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    fn runtime_type(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.start_failure {
            Some(StartFailure::Unreachable) => {
                return Err(Error::Connection("connection refused".to_string()))
            }
            Some(StartFailure::ModelNotFound) => {
                return Err(Error::ModelNotFound(request.model.clone()))
            }
            None => {}
        }

        Ok(Box::pin(DropCounter {
            inner: self.script(),
            finished: false,
            dropped: self.dropped.clone(),
        }))
    }
}

/// Counts streams dropped before yielding a terminal item.
struct DropCounter {
    inner: FragmentStream,
    finished: bool,
    dropped: Arc<AtomicUsize>,
}

impl Stream for DropCounter {
    type Item = Result<ChatFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.poll_next_unpin(cx);
        match &poll {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => self.finished = true,
            Poll::Ready(Some(Ok(fragment))) if fragment.done => self.finished = true,
            _ => {}
        }
        poll
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        if !self.finished {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
