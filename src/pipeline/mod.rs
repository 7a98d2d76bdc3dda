// Answer pipeline
// Retrieval, context formatting, prompt assembly and generation

pub mod template;


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::generation::Generator;
use crate::retriever::Retriever;
use crate::{RagError, Result};

pub use template::PromptTemplate;

/// Outcome of one question; contexts and prompt are kept for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub answer: String,
    pub retrieved_contexts: Vec<String>,
    /// Squared L2 distance of each retrieved context, aligned with `retrieved_contexts`
    #[serde(default)]
    pub distances: Vec<f32>,
    pub prompt: String,
}

/// Number each document as a reference source, nearest first
#[inline]
pub fn format_context<S: AsRef<str>>(documents: &[S]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, document)| format!("Nguồn tham khảo {}:\n{}", i + 1, document.as_ref()))
        .join("\n\n")
}

pub struct AnswerPipeline<E, G> {
    retriever: Retriever<E>,
    generator: G,
    template: PromptTemplate,
    top_k: usize,
}

impl<E: Embedder, G: Generator> AnswerPipeline<E, G> {
    /// # Errors
    /// * `Template` - if `template` is malformed
    /// * `InvalidArgument` - if `top_k` is zero
    #[inline]
    pub fn new(retriever: Retriever<E>, generator: G, template: &str, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be a positive integer".to_string(),
            ));
        }

        Ok(Self {
            retriever,
            generator,
            template: PromptTemplate::parse(template)?,
            top_k,
        })
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever<E> {
        &self.retriever
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer `question` from the knowledge base.
    ///
    /// Each call is independent; nothing is cached or retried.
    ///
    /// # Errors
    /// Retrieval errors propagate unchanged. Generation failures surface as
    /// `GenerationService`, or `Timeout` when the generator gave up waiting.
    #[inline]
    pub fn ask(&self, question: &str) -> Result<PipelineResult> {
        let (documents, distances): (Vec<String>, Vec<f32>) = self
            .retriever
            .search_with_distances(question, self.top_k)?
            .into_iter()
            .map(|hit| (hit.text, hit.distance))
            .unzip();
        debug!("Retrieved {} documents for question", documents.len());

        let context = format_context(&documents);
        let prompt = self.template.render(&context, question);

        let answer = self.generator.generate(&prompt).map_err(|e| match e {
            RagError::GenerationService(_) | RagError::Timeout(_) => e,
            other => RagError::GenerationService(other.to_string()),
        })?;
        info!("Generated answer of {} characters", answer.chars().count());

        Ok(PipelineResult {
            answer: answer.trim().to_string(),
            retrieved_contexts: documents,
            distances,
            prompt,
        })
    }
}
