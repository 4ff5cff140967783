use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::constants::RETRIEVAL_TOP_K;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{Document, VectorIndex};

/// `retrieve(query)` returns at most top-k documents, best match first.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

/// Embeds the query and runs a fixed top-k lookup against a loaded index.
pub struct IndexRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl IndexRetriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            top_k: RETRIEVAL_TOP_K,
        }
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, self.top_k)?;
        debug!(
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "Retrieved context"
        );
        Ok(hits.into_iter().map(|hit| hit.document).collect())
    }
}

/// Joins document text with a blank line between documents.
pub fn join_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Map;

    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| if t.contains("rust") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }

        fn model_name(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn index_with(n: usize) -> VectorIndex {
        let mut index = VectorIndex::new("axis", 2);
        for i in 0..n {
            let doc = Document {
                id: format!("d{i}"),
                text: format!("doc {i}"),
                metadata: Map::new(),
            };
            let embedding = if i == 3 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
            index.add(doc, embedding).unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_retrieve_is_bounded_by_top_k() {
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let retriever = IndexRetriever::new(Arc::new(index_with(10)), embedder.clone());

        let docs = retriever.retrieve("tell me about rust").await.unwrap();
        assert_eq!(docs.len(), RETRIEVAL_TOP_K);
        assert_eq!(docs[0].id, "d3");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_index_skips_embedding() {
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let retriever = IndexRetriever::new(Arc::new(index_with(0)), embedder.clone());

        let docs = retriever.retrieve("xyz").await.unwrap();
        assert!(docs.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_join_context_separates_with_blank_line() {
        let docs = index_with(2)
            .entries
            .into_iter()
            .map(|e| e.document)
            .collect::<Vec<_>>();
        assert_eq!(join_context(&docs), "doc 0\n\ndoc 1");
        assert_eq!(join_context(&[]), "");
    }
}
