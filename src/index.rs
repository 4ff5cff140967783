//! Flat on-disk document index: loading, similarity search and building.
//!
//! The index lives in a directory as a single `index.json` holding every
//! document together with its embedding and the model that produced it.
//! Search is an exhaustive cosine scan; the document set is one persona's
//! profile, so it stays small.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::constants::INDEX_FILE_NAME;
use crate::embedding::Embedder;
use crate::error::{ChatError, Result};
use crate::profile::Profile;

/// A text chunk owned by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub document: Document,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub embedding_model: String,
    pub dimension: usize,
    pub entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, document: Document, embedding: Vec<f32>) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(ChatError::IndexLoad(format!(
                "document '{}' has a {}-dim embedding, index expects {}",
                document.id,
                embedding.len(),
                self.dimension
            )));
        }
        self.entries.push(IndexEntry {
            document,
            embedding,
        });
        Ok(())
    }

    /// Returns up to `limit` documents, best match first. Equal scores keep
    /// index order.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(ChatError::Embedding(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                document: entry.document.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Writes `index.json` into `dir`, creating the directory if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE_NAME);
        let json = serde_json::to_string(self).map_err(|e| ChatError::Io(e.to_string()))?;
        std::fs::write(&path, json)?;
        info!(documents = self.len(), "Wrote index to {}", path.display());
        Ok(path)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[async_trait]
pub trait IndexLoader: Send + Sync {
    async fn load(&self) -> Result<VectorIndex>;
}

/// Reads `index.json` from an index directory and checks it was built with
/// the expected embedding model.
pub struct DiskIndexLoader {
    dir: PathBuf,
    expected_model: String,
    expected_dimension: usize,
}

impl DiskIndexLoader {
    pub fn new(dir: impl Into<PathBuf>, expected_model: &str, expected_dimension: usize) -> Self {
        Self {
            dir: dir.into(),
            expected_model: expected_model.to_string(),
            expected_dimension,
        }
    }
}

#[async_trait]
impl IndexLoader for DiskIndexLoader {
    async fn load(&self) -> Result<VectorIndex> {
        let path = self.dir.join(INDEX_FILE_NAME);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ChatError::IndexLoad(format!("{}: {}", path.display(), e)))?;
        let index: VectorIndex = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::IndexLoad(format!("{}: {}", path.display(), e)))?;

        if index.embedding_model != self.expected_model {
            return Err(ChatError::IndexLoad(format!(
                "index was built with '{}', expected '{}'",
                index.embedding_model, self.expected_model
            )));
        }
        if index.dimension != self.expected_dimension {
            return Err(ChatError::IndexLoad(format!(
                "index dimension is {}, expected {}",
                index.dimension, self.expected_dimension
            )));
        }
        if let Some(bad) = index
            .entries
            .iter()
            .find(|entry| entry.embedding.len() != index.dimension)
        {
            return Err(ChatError::IndexLoad(format!(
                "document '{}' has a {}-dim embedding",
                bad.document.id,
                bad.embedding.len()
            )));
        }

        info!(documents = index.len(), "Loaded vector index from {}", path.display());
        Ok(index)
    }
}

/// Splits a profile into one chunk per top-level section, and one per
/// element for sections that are lists.
pub fn chunk_profile(profile: &Profile) -> Vec<Document> {
    let Some(sections) = profile.data.as_object() else {
        return Vec::new();
    };

    let mut documents = Vec::new();
    for (section, value) in sections {
        match value {
            Value::Array(items) if !items.iter().all(is_scalar) => {
                for (i, item) in items.iter().enumerate() {
                    push_chunk(&mut documents, format!("{section}[{i}]"), section, Some(i), item);
                }
            }
            _ => push_chunk(&mut documents, section.clone(), section, None, value),
        }
    }
    documents
}

fn push_chunk(
    documents: &mut Vec<Document>,
    id: String,
    section: &str,
    position: Option<usize>,
    value: &Value,
) {
    let mut lines = Vec::new();
    flatten_into("", value, &mut lines);
    if lines.is_empty() {
        return;
    }

    let mut metadata = Map::new();
    metadata.insert("section".to_string(), Value::from(section));
    if let Some(i) = position {
        metadata.insert("position".to_string(), Value::from(i));
    }

    documents.push(Document {
        id,
        text: format!("{}\n{}", section, lines.join("\n")),
        metadata,
    });
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn flatten_into(path: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_into(&child_path, child, lines);
            }
        }
        Value::Array(items) if items.iter().all(is_scalar) => {
            let joined = items
                .iter()
                .map(scalar_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            push_line(path, joined, lines);
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(&format!("{path}[{i}]"), item, lines);
            }
        }
        scalar => push_line(path, scalar_text(scalar), lines),
    }
}

fn push_line(path: &str, text: String, lines: &mut Vec<String>) {
    if text.trim().is_empty() {
        return;
    }
    if path.is_empty() {
        lines.push(text);
    } else {
        lines.push(format!("{path}: {text}"));
    }
}

/// Chunks the profile and embeds every chunk in a single batch.
pub async fn build_index(profile: &Profile, embedder: &dyn Embedder) -> Result<VectorIndex> {
    let documents = chunk_profile(profile);
    debug!(chunks = documents.len(), "Chunked profile");

    let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;

    let mut index = VectorIndex::new(embedder.model_name(), embedder.dimension());
    for (document, embedding) in documents.into_iter().zip(embeddings) {
        index.add(document, embedding)?;
    }
    Ok(index)
}
