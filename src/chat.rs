// Session loop shared by the web UI and the terminal chat.
//
// A `ChatSession` owns one conversation: its transcript, its turn state and
// the index handle it loaded. Each turn runs retrieve -> prompt -> generate
// to completion before the next question is accepted.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, Secrets};
use crate::constants::{EMBEDDING_DIMENSION, EMBEDDING_MODEL};
use crate::embedding::{Embedder, HfEmbedder};
use crate::error::ChatError;
use crate::index::{DiskIndexLoader, IndexLoader, VectorIndex};
use crate::llm_interaction::{ChatModel, Generator, GroqClient};
use crate::profile::Profile;
use crate::prompt::{build_prompt, format_history};
use crate::retriever::{join_context, IndexRetriever, Retriever};

pub const NO_CONTEXT_WARNING: &str =
    "No relevant context found in the index! The assistant may not provide a good answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

/// Everything a turn reports back to whoever renders the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    UserMessage(TranscriptEntry),
    Thinking,
    Warning(String),
    Error(String),
    AssistantMessage(TranscriptEntry),
    /// Full snapshot for re-rendering.
    Transcript(Vec<TranscriptEntry>),
}

/// Collaborators a turn needs. Borrowed for the duration of one turn.
pub struct TurnContext<'a> {
    pub persona_name: &'a str,
    pub retriever: &'a dyn Retriever,
    pub generator: &'a dyn Generator,
    pub model: ChatModel,
}

/// Per-session state: created when a UI session starts, dropped when it ends.
#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    state: TurnState,
    transcript: Vec<TranscriptEntry>,
    index: Option<Arc<VectorIndex>>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TurnState::Idle,
            transcript: Vec::new(),
            index: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Returns the session's index, loading it on first use. Failed loads are
    /// not cached.
    pub async fn ensure_index(&mut self, loader: &dyn IndexLoader) -> Result<Arc<VectorIndex>, ChatError> {
        if let Some(index) = &self.index {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(loader.load().await?);
        info!(session = %self.id, documents = index.len(), "Cached index for session");
        self.index = Some(Arc::clone(&index));
        Ok(index)
    }

    /// `Idle -> AwaitingResponse`: appends the user entry. Blank input is
    /// ignored and returns `None`.
    pub fn begin_turn(&mut self, question: &str) -> Result<Option<TranscriptEntry>, ChatError> {
        if self.state == TurnState::AwaitingResponse {
            return Err(ChatError::Busy);
        }
        let question = question.trim();
        if question.is_empty() {
            return Ok(None);
        }
        let entry = TranscriptEntry::new(Role::User, question.to_string());
        self.transcript.push(entry.clone());
        self.state = TurnState::AwaitingResponse;
        Ok(Some(entry))
    }

    /// `AwaitingResponse -> Idle`: appends the assistant entry on success,
    /// nothing on failure.
    pub fn finish_turn(
        &mut self,
        outcome: Result<String, ChatError>,
    ) -> Result<TranscriptEntry, ChatError> {
        self.state = TurnState::Idle;
        let answer = outcome?;
        let entry = TranscriptEntry::new(Role::Assistant, answer);
        self.transcript.push(entry.clone());
        Ok(entry)
    }

    /// Runs one full turn, sending events as they happen. The last event is
    /// always a transcript snapshot unless the input was ignored or rejected.
    pub async fn run_turn(
        &mut self,
        ctx: &TurnContext<'_>,
        question: &str,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) {
        let emit = |event: ChatEvent| {
            // A receiver that went away just stops listening.
            let _ = events.send(event);
        };

        let user_entry = match self.begin_turn(question) {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!(session = %self.id, "Rejected input: {}", e);
                emit(ChatEvent::Error(e.to_string()));
                return;
            }
        };
        let question = user_entry.content.clone();
        emit(ChatEvent::UserMessage(user_entry));
        emit(ChatEvent::Thinking);

        let outcome = self.answer(ctx, &question, &emit).await;
        match self.finish_turn(outcome) {
            Ok(entry) => emit(ChatEvent::AssistantMessage(entry)),
            Err(e) => {
                warn!(session = %self.id, "Turn failed: {}", e);
                emit(ChatEvent::Error(format!("Error: {}", e)));
            }
        }
        emit(ChatEvent::Transcript(self.transcript.clone()));
    }

    /// Same as [`run_turn`](Self::run_turn) but returns the events once the
    /// turn is over.
    pub async fn run_turn_collect(&mut self, ctx: &TurnContext<'_>, question: &str) -> Vec<ChatEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.run_turn(ctx, question, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    async fn answer(
        &self,
        ctx: &TurnContext<'_>,
        question: &str,
        emit: &impl Fn(ChatEvent),
    ) -> Result<String, ChatError> {
        let documents = ctx.retriever.retrieve(question).await?;
        if documents.is_empty() {
            warn!(session = %self.id, "No context retrieved for question");
            emit(ChatEvent::Warning(NO_CONTEXT_WARNING.to_string()));
        }

        let history = format_history(&self.transcript);
        let prompt = build_prompt(ctx.persona_name, &join_context(&documents), &history, question);
        ctx.generator.generate(ctx.model, &prompt).await
    }
}

/// Text shown in the terminal for an event, if any.
pub fn render_terminal_event(event: &ChatEvent, persona_name: &str) -> Option<String> {
    match event {
        ChatEvent::AssistantMessage(entry) => Some(format!("{}'s assistant: {}", persona_name, entry.content)),
        ChatEvent::Warning(text) => Some(format!("warning: {}", text)),
        ChatEvent::Error(text) => Some(text.clone()),
        ChatEvent::UserMessage(_) | ChatEvent::Thinking | ChatEvent::Transcript(_) => None,
    }
}

/// Interactive text chat on stdin/stdout. Ends on EOF or `/quit`.
pub async fn run_terminal_chat(config: &AppConfig, model: ChatModel) -> Result<()> {
    let secrets = Secrets::load(&config.secrets)?;
    let profile = Profile::load(&config.profile)?;

    let embedder: Arc<dyn Embedder> = Arc::new(HfEmbedder::new(secrets.hf_token.clone()));
    let generator = GroqClient::new(secrets.groq_api_key.clone());
    let loader = DiskIndexLoader::new(&config.index_dir, EMBEDDING_MODEL, EMBEDDING_DIMENSION);

    let mut session = ChatSession::new();
    let index = session
        .ensure_index(&loader)
        .await
        .context("Failed to load the vector index")?;
    let retriever = IndexRetriever::new(index, embedder);
    let ctx = TurnContext {
        persona_name: &profile.name,
        retriever: &retriever,
        generator: &generator,
        model,
    };

    info!(session = %session.id(), %model, "Starting terminal chat");
    println!("{} (model: {}, /quit to exit)", profile.chat_title(), model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }

        for event in session.run_turn_collect(&ctx, &line).await {
            if let Some(text) = render_terminal_event(&event, &profile.name) {
                println!("{}", text);
            }
        }
    }

    info!(turns = session.transcript().len(), "Terminal chat finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_turn_appends_user_and_blocks_second_input() {
        let mut session = ChatSession::new();
        let entry = session.begin_turn("  hello  ").unwrap().unwrap();
        assert_eq!(entry.content, "hello");
        assert_eq!(session.state(), TurnState::AwaitingResponse);

        assert!(matches!(session.begin_turn("again"), Err(ChatError::Busy)));
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let mut session = ChatSession::new();
        assert!(session.begin_turn("   ").unwrap().is_none());
        assert_eq!(session.state(), TurnState::Idle);
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_finish_turn_failure_appends_nothing() {
        let mut session = ChatSession::new();
        session.begin_turn("hello").unwrap();
        let result = session.finish_turn(Err(ChatError::Generation("boom".into())));
        assert!(result.is_err());
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_finish_turn_success_appends_assistant() {
        let mut session = ChatSession::new();
        session.begin_turn("hello").unwrap();
        session.finish_turn(Ok("hi".to_string())).unwrap();
        let roles: Vec<Role> = session.transcript().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(ChatEvent::Warning("careful".into())).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["payload"], "careful");

        let json = serde_json::to_value(ChatEvent::Thinking).unwrap();
        assert_eq!(json["type"], "thinking");

        let entry = TranscriptEntry::new(Role::Assistant, "hi".into());
        let json = serde_json::to_value(ChatEvent::AssistantMessage(entry)).unwrap();
        assert_eq!(json["type"], "assistant_message");
        assert_eq!(json["payload"]["role"], "assistant");
    }

    #[test]
    fn test_terminal_rendering() {
        let entry = TranscriptEntry::new(Role::Assistant, "She likes Rust.".into());
        assert_eq!(
            render_terminal_event(&ChatEvent::AssistantMessage(entry), "Alice").unwrap(),
            "Alice's assistant: She likes Rust."
        );
        assert!(render_terminal_event(&ChatEvent::Thinking, "Alice").is_none());
    }
}
