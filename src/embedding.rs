//! Sentence embeddings from the hosted feature-extraction endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::constants::{self, EMBEDDING_DIMENSION, EMBEDDING_MODEL};
use crate::error::{ChatError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ChatError::Embedding("empty embedding response".to_string()))
    }

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a [String],
}

/// Client for `POST {base}/models/{model}/pipeline/feature-extraction`.
pub struct HfEmbedder {
    client: Client,
    base_url: String,
    model: String,
    token: String,
    dimension: usize,
}

impl HfEmbedder {
    pub fn new(token: String) -> Self {
        Self::with_base_url(constants::HF_INFERENCE_URL.clone(), token)
    }

    pub fn with_base_url(base_url: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: EMBEDDING_MODEL.to_string(),
            token,
            dimension: EMBEDDING_DIMENSION,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}/pipeline/feature-extraction",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl Embedder for HfEmbedder {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&FeatureExtractionRequest { inputs: texts })
            .send()
            .await
            .map_err(|e| ChatError::Embedding(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Embedding API request failed");
            return Err(ChatError::Embedding(format!(
                "status {}: {}",
                status, error_body
            )));
        }

        let vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| ChatError::Embedding(format!("unexpected response body: {}", e)))?;

        if vectors.len() != texts.len() {
            return Err(ChatError::Embedding(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(ChatError::Embedding(format!(
                "expected {}-dim vectors, got {}",
                self.dimension,
                bad.len()
            )));
        }

        debug!(count = vectors.len(), "Received embeddings");
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_includes_model() {
        let embedder = HfEmbedder::with_base_url("http://localhost:9/".to_string(), "t".into());
        assert_eq!(
            embedder.endpoint(),
            "http://localhost:9/models/sentence-transformers/all-MiniLM-L6-v2/pipeline/feature-extraction"
        );
        assert_eq!(embedder.dimension(), 384);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        // Port 9 is never contacted for an empty batch.
        let embedder = HfEmbedder::with_base_url("http://127.0.0.1:9".to_string(), "t".into());
        let vectors = embedder.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
