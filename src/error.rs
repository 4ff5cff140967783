//! Error types shared by every pipeline stage.
//!
//! Each variant maps to one failure class of the chat pipeline. Render-level
//! failures (secrets, profile, index) stop a session from starting; the rest
//! only end the current turn.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// One or more required secrets are absent.
    #[error("Missing API keys in secrets! Please add {missing} to `{source_hint}` or the environment.")]
    MissingSecrets { missing: String, source_hint: String },

    /// The secrets file exists but could not be parsed.
    #[error("Error reading secrets file: {0}")]
    Secrets(String),

    /// Profile file missing, unreadable or malformed.
    #[error("Error loading user profile: {0}")]
    Profile(String),

    /// Vector index missing, unreadable or incompatible with the embedding model.
    #[error("Error loading vector index: {0}")]
    IndexLoad(String),

    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Generation request failed: {0}")]
    Generation(String),

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    /// A new question arrived while the previous one is still being answered.
    #[error("Still answering the previous question, please wait")]
    Busy,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
