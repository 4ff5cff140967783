// Endpoint bases and fixed defaults, overridable from the environment.

use std::env;

pub const EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const EMBEDDING_DIMENSION: usize = 384;

/// Number of documents handed to the prompt per question.
pub const RETRIEVAL_TOP_K: usize = 4;

/// Transcript entries rendered into the conversation-history block.
pub const HISTORY_WINDOW: usize = 5;

pub const FALLBACK_ANSWER: &str = "I don't have that information.";

pub const DEFAULT_PROFILE_PATH: &str = "user_profile.json";
pub const DEFAULT_INDEX_DIR: &str = "faiss_index";
pub const DEFAULT_SECRETS_PATH: &str = ".streamlit/secrets.toml";
pub const INDEX_FILE_NAME: &str = "index.json";

lazy_static::lazy_static! {
    pub static ref GROQ_API_URL: String = env::var("GROQ_API_URL").unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
    pub static ref HF_INFERENCE_URL: String = env::var("HF_INFERENCE_URL").unwrap_or_else(|_| "https://router.huggingface.co/hf-inference".to_string());
}
