
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::store::{Manifest, persist};
use super::{Document, RawRecord};
use crate::embeddings::Embedder;
use crate::index::VectorIndex;
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 16;

/// Summary of a completed build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub document_count: usize,
    pub dimension: usize,
    pub knowledge_base_dir: PathBuf,
    pub elapsed: Duration,
}

/// Offline job turning raw FAQ records into a persisted knowledge base
pub struct KnowledgeBaseBuilder<E> {
    embedder: E,
    batch_size: usize,
    show_progress: bool,
}

impl<E: Embedder> KnowledgeBaseBuilder<E> {
    #[inline]
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }

    /// Number of documents sent to the embedder per request; must be positive
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Draw a progress bar on stderr while embedding, when a user is watching
    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Normalize, embed and index `records`.
    ///
    /// Document `i` is derived from record `i` and its vector sits at index
    /// position `i`.
    ///
    /// # Errors
    /// * `InvalidArgument` - if the batch size is zero
    /// * `EmbeddingService` - if the embedder fails or returns the wrong number of vectors
    /// * `DimensionMismatch` - if the embedder returns vectors of differing lengths
    #[inline]
    pub fn build(&self, records: &[RawRecord]) -> Result<(VectorIndex, Vec<Document>)> {
        if self.batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "embedding batch size must be a positive integer".to_string(),
            ));
        }

        let started = Instant::now();
        let documents: Vec<Document> = records.iter().map(Document::from_record).collect();
        info!(
            "Normalized {} records into documents in {:.2?}",
            documents.len(),
            started.elapsed()
        );

        let started = Instant::now();
        let bar = self.progress_bar(documents.len());
        let vectors = self.embed_documents(&documents, &bar)?;
        info!(
            "Created {} embeddings in {:.2?}",
            vectors.len(),
            started.elapsed()
        );

        let started = Instant::now();
        let index = VectorIndex::build(&vectors)?;
        info!(
            "Built index with {} vectors (dimension {}) in {:.2?}",
            index.len(),
            index.dimension(),
            started.elapsed()
        );

        Ok((index, documents))
    }

    /// Build from `records` and atomically persist the result into `dir`
    #[inline]
    pub fn build_and_persist(
        &self,
        records: &[RawRecord],
        dir: &Path,
        source: Option<&Path>,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let (index, documents) = self.build(records)?;

        let manifest = Manifest::new(&index, self.embedder.model_name(), source);
        persist(dir, &index, &documents, &manifest)?;

        Ok(BuildReport {
            document_count: documents.len(),
            dimension: index.dimension(),
            knowledge_base_dir: dir.to_path_buf(),
            elapsed: started.elapsed(),
        })
    }

    /// The bar is left finished on every exit; abandoned when a batch fails
    fn embed_documents(&self, documents: &[Document], bar: &ProgressBar) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(|d| d.as_str().to_string()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                "Embedding batch {} ({} documents)",
                batch_number + 1,
                batch.len()
            );

            let batch_vectors = match self.embedder.embed(batch) {
                Ok(batch_vectors) => batch_vectors,
                Err(e) => {
                    bar.abandon();
                    return Err(as_embedding_failure(e));
                }
            };
            if batch_vectors.len() != batch.len() {
                bar.abandon();
                return Err(RagError::EmbeddingService(format!(
                    "embedder returned {} vectors for a batch of {} documents",
                    batch_vectors.len(),
                    batch.len()
                )));
            }

            vectors.extend(batch_vectors);
            bar.inc(batch.len() as u64);
        }

        bar.finish_and_clear();
        Ok(vectors)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if self.show_progress && console::user_attended_stderr() {
            ProgressBar::new(total as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding documents")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        }
    }
}

fn as_embedding_failure(error: RagError) -> RagError {
    match error {
        RagError::EmbeddingService(_) | RagError::Timeout(_) => error,
        other => RagError::EmbeddingService(other.to_string()),
    }
}
