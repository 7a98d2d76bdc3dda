// Generation module
// Prompt-to-text collaborators invoked by the answer pipeline

pub mod ollama;

use std::sync::Arc;

use crate::Result;

pub use ollama::OllamaGenerator;

/// Maps an assembled prompt to answer text.
///
/// Decoding parameters are the implementation's concern; the pipeline only
/// hands over the prompt and trims what comes back.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<T: Generator + ?Sized> Generator for Arc<T> {
    #[inline]
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

impl<T: Generator + ?Sized> Generator for &T {
    #[inline]
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}
