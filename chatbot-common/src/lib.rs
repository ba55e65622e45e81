//! Chatbot Common Types
//!
//! Wire types shared by the chat relay server and its clients.

pub mod chat;
pub mod response;

pub use chat::{
    ChatCompletion, ChatFragment, ChatMessage, ChatRequest, FragmentStats, InvalidRequest, Role,
    SamplingOptions, UNBOUNDED_TOKENS,
};
pub use response::ApiResponse;
