
use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::{RagError, Result};

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A prompt template with `{context}` and `{question}` placeholders.
///
/// `{{` and `}}` stand for literal braces. Any other placeholder name, a
/// stray brace, or a template missing one of the two placeholders is rejected
/// when parsing, so rendering itself cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// # Errors
    /// * `Template` - if the template is malformed or lacks a required placeholder
    #[inline]
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last_end = 0;

        for captures in PLACEHOLDER_REGEX.captures_iter(template) {
            let captures =
                captures.map_err(|e| RagError::Template(format!("cannot scan template: {}", e)))?;
            let Some(token) = captures.get(0) else {
                continue;
            };

            literal.push_str(&template[last_end..token.start()]);
            last_end = token.end();

            match token.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" | "}" => {
                    return Err(RagError::Template(format!(
                        "unmatched '{}' at byte {}",
                        token.as_str(),
                        token.start()
                    )));
                }
                _ => {
                    let name = captures.get(1).map_or("", |m| m.as_str());
                    let segment = match name {
                        "context" => Segment::Context,
                        "question" => Segment::Question,
                        other => {
                            return Err(RagError::Template(format!(
                                "unknown placeholder {{{}}}",
                                other
                            )));
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
            }
        }

        literal.push_str(&template[last_end..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for (required, name) in [(Segment::Context, "context"), (Segment::Question, "question")] {
            if !segments.contains(&required) {
                return Err(RagError::Template(format!(
                    "template is missing the {{{}}} placeholder",
                    name
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Substitute `context` and `question`; values are inserted verbatim
    #[inline]
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut prompt = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => prompt.push_str(text),
                Segment::Context => prompt.push_str(context),
                Segment::Question => prompt.push_str(question),
            }
        }
        prompt
    }
}
