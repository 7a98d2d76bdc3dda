use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source data error: {0}")]
    SourceData(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Generation service error: {0}")]
    GenerationService(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Knowledge base load error: {message}")]
    KnowledgeBaseLoad {
        message: String,
        #[source]
        source: Box<RagError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Wrap a failure encountered while loading persisted artifacts.
    #[inline]
    pub fn knowledge_base_load(message: impl Into<String>, source: RagError) -> Self {
        Self::KnowledgeBaseLoad {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod generation;
pub mod http;
pub mod index;
pub mod knowledge_base;
pub mod pipeline;
pub mod retriever;
