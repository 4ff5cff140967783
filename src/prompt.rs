//! The fixed persona prompt and the conversation-history window.

use crate::chat::TranscriptEntry;
use crate::constants::{FALLBACK_ANSWER, HISTORY_WINDOW};

/// Renders the trailing `HISTORY_WINDOW` transcript entries as
/// `role: content` lines, oldest first.
pub fn format_history(entries: &[TranscriptEntry]) -> String {
    let start = entries.len().saturating_sub(HISTORY_WINDOW);
    entries[start..]
        .iter()
        .map(|entry| format!("{}: {}", entry.role, entry.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(persona_name: &str, context: &str, history: &str, question: &str) -> String {
    format!(
        r#"You are an AI assistant created to answer questions about {name}. You are **not** {name}, but you use the provided context to give accurate responses.

Context about {name}:
{context}

Conversation History:
{history}

**Rules:**
1. Be respectful and professional.
2. Answer only using the given context.
3. If unsure, say "{fallback}"
4. Keep responses professional and concise.

**User's Question:** {question}
"#,
        name = persona_name,
        context = context,
        history = history,
        fallback = FALLBACK_ANSWER,
        question = question,
    )
}
