// Retriever module
// Query embedding plus nearest-neighbor lookup over a loaded knowledge base


use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::Embedder;
use crate::knowledge_base::KnowledgeBase;
use crate::{RagError, Result};

/// A retrieved document together with its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub position: usize,
    pub distance: f32,
    pub text: String,
}

/// Serves nearest-neighbor searches from an immutable knowledge base snapshot
#[derive(Debug)]
pub struct Retriever<E> {
    knowledge_base: Arc<KnowledgeBase>,
    embedder: E,
}

impl<E: Embedder> Retriever<E> {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>, embedder: E) -> Self {
        Self {
            knowledge_base,
            embedder,
        }
    }

    /// Load the knowledge base persisted in `dir` and serve it
    ///
    /// # Errors
    /// * `KnowledgeBaseLoad` - if the artifacts are missing, corrupt or inconsistent
    #[inline]
    pub fn load(dir: &Path, embedder: E) -> Result<Self> {
        let knowledge_base = KnowledgeBase::load(dir)?;
        Ok(Self::new(Arc::new(knowledge_base), embedder))
    }

    #[inline]
    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge_base
    }

    #[inline]
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Texts of the `top_k` documents nearest to `query`, nearest first
    ///
    /// # Errors
    /// * `InvalidArgument` - if `top_k` is zero
    /// * `EmbeddingService` - if the query cannot be embedded
    /// * `DimensionMismatch` - if the query embedding does not match the index
    #[inline]
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        Ok(self
            .search_with_distances(query, top_k)?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Like [`Retriever::search`], keeping positions and distances
    #[inline]
    pub fn search_with_distances(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be a positive integer".to_string(),
            ));
        }

        if self.knowledge_base.is_empty() {
            debug!("Knowledge base is empty, skipping query embedding");
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query(query)?;
        let neighbors = self.knowledge_base.index().query(&query_vector, top_k)?;

        neighbors
            .into_iter()
            .map(|neighbor| {
                let document = self.knowledge_base.document(neighbor.position).ok_or_else(|| {
                    RagError::InvalidArgument(format!(
                        "index returned position {} outside the document list",
                        neighbor.position
                    ))
                })?;
                Ok(RetrievedDocument {
                    position: neighbor.position,
                    distance: neighbor.distance,
                    text: document.as_str().to_string(),
                })
            })
            .collect()
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embedder
            .embed(&[query.to_string()])
            .map_err(|e| match e {
                RagError::EmbeddingService(_) | RagError::Timeout(_) => e,
                other => RagError::EmbeddingService(other.to_string()),
            })?;

        if vectors.len() != 1 {
            return Err(RagError::EmbeddingService(format!(
                "expected one query embedding, got {}",
                vectors.len()
            )));
        }

        Ok(vectors.remove(0))
    }
}
