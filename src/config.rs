//! Runtime configuration: file locations and the two required secrets.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::{DEFAULT_INDEX_DIR, DEFAULT_PROFILE_PATH, DEFAULT_SECRETS_PATH};
use crate::error::{ChatError, Result};

pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const HF_TOKEN: &str = "HF_TOKEN";

/// File locations shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct AppConfig {
    /// JSON profile describing the persona.
    #[arg(long, global = true, env = "PERSONA_PROFILE", default_value = DEFAULT_PROFILE_PATH)]
    pub profile: PathBuf,

    /// Directory holding the prebuilt vector index.
    #[arg(long, global = true, env = "PERSONA_INDEX_DIR", default_value = DEFAULT_INDEX_DIR)]
    pub index_dir: PathBuf,

    /// TOML file with GROQ_API_KEY and HF_TOKEN (falls back to the environment).
    #[arg(long, global = true, env = "PERSONA_SECRETS", default_value = DEFAULT_SECRETS_PATH)]
    pub secrets: PathBuf,

    #[arg(long, global = true, env = "PERSONA_TEMPLATES", default_value = "templates")]
    pub templates: PathBuf,

    #[arg(long, global = true, env = "PERSONA_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: PathBuf::from(DEFAULT_PROFILE_PATH),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            secrets: PathBuf::from(DEFAULT_SECRETS_PATH),
            templates: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Credentials for the LLM API and the embedding service.
#[derive(Clone)]
pub struct Secrets {
    pub groq_api_key: String,
    pub hf_token: String,
}

// Keep keys out of logs.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("groq_api_key", &"<redacted>")
            .field("hf_token", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Reads secrets from `path` when it exists, falling back to process
    /// environment variables for any key the file does not provide.
    pub fn load(path: &Path) -> Result<Self> {
        let table = match std::fs::read_to_string(path) {
            Ok(content) => Some(
                content
                    .parse::<toml::Table>()
                    .map_err(|e| ChatError::Secrets(format!("{}: {}", path.display(), e)))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No secrets file at {}, using environment only", path.display());
                None
            }
            Err(e) => return Err(ChatError::Secrets(format!("{}: {}", path.display(), e))),
        };

        Self::resolve(table.as_ref(), |key| std::env::var(key).ok(), path)
    }

    fn resolve(
        table: Option<&toml::Table>,
        env: impl Fn(&str) -> Option<String>,
        path: &Path,
    ) -> Result<Self> {
        let lookup = |key: &str| -> Option<String> {
            let present = |v: &String| !v.trim().is_empty();
            table
                .and_then(|t| t.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .filter(present)
                .or_else(|| env(key).filter(present))
        };

        let groq_api_key = lookup(GROQ_API_KEY);
        let hf_token = lookup(HF_TOKEN);

        match (groq_api_key, hf_token) {
            (Some(groq_api_key), Some(hf_token)) => Ok(Self {
                groq_api_key,
                hf_token,
            }),
            (groq, hf) => {
                let missing: Vec<&str> = [(GROQ_API_KEY, groq.is_none()), (HF_TOKEN, hf.is_none())]
                    .into_iter()
                    .filter_map(|(key, absent)| absent.then_some(key))
                    .collect();
                warn!(?missing, "Required secrets are missing");
                Err(ChatError::MissingSecrets {
                    missing: missing.join(", "),
                    source_hint: path.display().to_string(),
                })
            }
        }
    }
}
