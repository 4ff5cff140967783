pub mod chat;
pub mod config;
pub mod constants;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm_interaction;
pub mod profile;
pub mod prompt;
pub mod retriever;
pub mod web_server;

pub use chat::{ChatEvent, ChatSession, Role, TranscriptEntry, TurnContext, TurnState};
pub use error::{ChatError, Result};
