// Embeddings module
// Text-to-vector collaborators used by the builder and the retriever

pub mod ollama;

use std::sync::Arc;

use crate::Result;

pub use ollama::{ModelInfo, OllamaClient};

/// Maps text to fixed-length vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, and must be deterministic for a given model.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the model producing the vectors, recorded in the knowledge base manifest
    #[inline]
    fn model_name(&self) -> &str {
        "unknown"
    }
}

impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }

    #[inline]
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<T: Embedder + ?Sized> Embedder for &T {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }

    #[inline]
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
