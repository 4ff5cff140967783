//! The persona profile: a JSON document with at least `personal_info.name`.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    /// The whole document, kept for index building.
    pub data: Value,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Profile(format!("{}: {}", path.display(), e)))?;
        let profile = Self::from_json_str(&content)?;
        info!(name = %profile.name, "Loaded profile from {}", path.display());
        Ok(profile)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let data: Value =
            serde_json::from_str(content).map_err(|e| ChatError::Profile(e.to_string()))?;
        Self::from_value(data)
    }

    pub fn from_value(data: Value) -> Result<Self> {
        let name = data
            .get("personal_info")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ChatError::Profile("missing string field personal_info.name".to_string()))?
            .to_string();

        Ok(Self { name, data })
    }

    pub fn page_title(&self) -> String {
        format!("{}'s Chatbot", self.name)
    }

    pub fn chat_title(&self) -> String {
        format!("Chat with {}'s AI Assistant", self.name)
    }
}
