// Knowledge base module
// FAQ documents, raw record loading and the persisted index/document pair

pub mod builder;
pub mod store;


use std::fmt;
use std::fs;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::index::VectorIndex;
use crate::{RagError, Result};

pub use builder::{BuildReport, KnowledgeBaseBuilder};
pub use store::{DOCUMENTS_FILE_NAME, INDEX_FILE_NAME, MANIFEST_FILE_NAME, Manifest, persist};

const QUESTION_PREFIX: &str = "Hỏi: ";
const ANSWER_PREFIX: &str = "\nĐáp: ";

/// One question/answer pair as read from the source file.
///
/// Absent or `null` fields become empty strings and non-string scalars are
/// stringified. `answers` is accepted as an alias of `answer`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub question: String,
    #[serde(default, alias = "answers", deserialize_with = "lenient_text")]
    pub answer: String,
}

impl RawRecord {
    #[inline]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text,
        Some(other) => other.to_string(),
    })
}

/// A normalized FAQ entry; its position in the document list is its identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(String);

impl Document {
    #[inline]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// `"Hỏi: <question>\nĐáp: <answer>"`
    #[inline]
    pub fn from_record(record: &RawRecord) -> Self {
        let mut text = String::with_capacity(
            QUESTION_PREFIX.len() + record.question.len() + ANSWER_PREFIX.len() + record.answer.len(),
        );
        text.push_str(QUESTION_PREFIX);
        text.push_str(&record.question);
        text.push_str(ANSWER_PREFIX);
        text.push_str(&record.answer);
        Self(text)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Document {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Document {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// File layouts accepted by [`load_records`], chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Json,
    JsonLines,
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "jsonl" => Self::JsonLines,
            "csv" => Self::Csv,
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Self::Spreadsheet,
            _ => Self::Json,
        }
    }
}

/// Read raw records from a source file
///
/// The layout follows the extension: `.jsonl` is JSON Lines, `.csv` is a CSV
/// table, `.xlsx`/`.xls`/`.ods` read the first worksheet, anything else is a
/// JSON array. Tables need a header row naming a `question` column and an
/// `answer` (or `answers`) column.
///
/// # Errors
/// * `SourceData` - if the file is missing, unreadable or malformed
#[inline]
pub fn load_records(path: &Path) -> Result<Vec<RawRecord>> {
    let records = match SourceFormat::from_path(path) {
        SourceFormat::Json => {
            let content = read_source(path)?;
            serde_json::from_str::<Vec<RawRecord>>(&content).map_err(|e| {
                RagError::SourceData(format!(
                    "Failed to parse {} as a JSON array of records: {}",
                    path.display(),
                    e
                ))
            })?
        }
        SourceFormat::JsonLines => parse_json_lines(&read_source(path)?, path)?,
        SourceFormat::Csv => load_csv(path)?,
        SourceFormat::Spreadsheet => load_spreadsheet(path)?,
    };

    info!("Loaded {} raw records from {}", records.len(), path.display());
    Ok(records)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| RagError::SourceData(format!("Failed to read {}: {}", path.display(), e)))
}

fn parse_json_lines(content: &str, path: &Path) -> Result<Vec<RawRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str::<RawRecord>(line).map_err(|e| {
                RagError::SourceData(format!(
                    "Failed to parse {} line {}: {}",
                    path.display(),
                    number + 1,
                    e
                ))
            })
        })
        .collect()
}

fn load_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let csv_error =
        |e: csv::Error| RagError::SourceData(format!("Failed to read {}: {}", path.display(), e));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let header: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|row| {
            row.map(|row| row.iter().map(str::to_string).collect::<Vec<_>>())
                .map_err(csv_error)
        })
        .collect::<Result<Vec<_>>>()?;

    records_from_table(path, &header, rows)
}

fn load_spreadsheet(path: &Path) -> Result<Vec<RawRecord>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        RagError::SourceData(format!("Failed to open workbook {}: {}", path.display(), e))
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| RagError::SourceData(format!("{} has no worksheets", path.display())))?
        .map_err(|e| {
            RagError::SourceData(format!(
                "Failed to read first worksheet of {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
    let header = rows.next().ok_or_else(|| {
        RagError::SourceData(format!("first worksheet of {} is empty", path.display()))
    })?;

    records_from_table(path, &header, rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Map table rows to records through the header row; fully blank rows are skipped
fn records_from_table(
    path: &Path,
    header: &[String],
    rows: impl IntoIterator<Item = Vec<String>>,
) -> Result<Vec<RawRecord>> {
    let column = |names: &[&str]| {
        header.iter().position(|name| {
            let name = name.trim_start_matches('\u{feff}').trim();
            names.iter().any(|wanted| name.eq_ignore_ascii_case(wanted))
        })
    };
    let missing = |name: &str| {
        RagError::SourceData(format!(
            "{} has no `{}` column in its header row",
            path.display(),
            name
        ))
    };

    let question = column(&["question"]).ok_or_else(|| missing("question"))?;
    let answer = column(&["answer", "answers"]).ok_or_else(|| missing("answer"))?;

    Ok(rows
        .into_iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            RawRecord::new(
                row.get(question).cloned().unwrap_or_default(),
                row.get(answer).cloned().unwrap_or_default(),
            )
        })
        .collect())
}

/// The loaded, immutable pair of index and documents served by a retriever
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    index: VectorIndex,
    documents: Vec<Document>,
}

impl KnowledgeBase {
    /// Pair an index with its documents
    ///
    /// # Errors
    /// * `InvalidArgument` - if the index and document list have different lengths
    #[inline]
    pub fn new(index: VectorIndex, documents: Vec<Document>) -> Result<Self> {
        if index.len() != documents.len() {
            return Err(RagError::InvalidArgument(format!(
                "index holds {} vectors but there are {} documents",
                index.len(),
                documents.len()
            )));
        }
        Ok(Self { index, documents })
    }

    /// Load a knowledge base persisted by [`persist`]
    ///
    /// # Errors
    /// * `KnowledgeBaseLoad` - if an artifact is missing, corrupt, or the pair is inconsistent
    #[inline]
    pub fn load(dir: &Path) -> Result<Self> {
        let index_path = dir.join(INDEX_FILE_NAME);
        let documents_path = dir.join(DOCUMENTS_FILE_NAME);

        debug!("Loading vector index from {}", index_path.display());
        let index = VectorIndex::load(&index_path).map_err(|e| {
            RagError::knowledge_base_load(
                format!("cannot load vector index {}", index_path.display()),
                e,
            )
        })?;

        debug!("Loading documents from {}", documents_path.display());
        let documents = load_documents(&documents_path).map_err(|e| {
            RagError::knowledge_base_load(
                format!("cannot load documents {}", documents_path.display()),
                e,
            )
        })?;

        if index.len() != documents.len() {
            return Err(RagError::knowledge_base_load(
                format!("inconsistent knowledge base in {}", dir.display()),
                RagError::CorruptIndex {
                    path: index_path,
                    reason: format!(
                        "index holds {} vectors but {} documents were found",
                        index.len(),
                        documents.len()
                    ),
                },
            ));
        }

        match Manifest::load(dir) {
            Ok(Some(manifest)) if manifest.document_count != documents.len() => {
                return Err(RagError::knowledge_base_load(
                    format!("inconsistent knowledge base in {}", dir.display()),
                    RagError::CorruptIndex {
                        path: dir.join(MANIFEST_FILE_NAME),
                        reason: format!(
                            "manifest records {} documents but {} were found",
                            manifest.document_count,
                            documents.len()
                        ),
                    },
                ));
            }
            Ok(_) => {}
            Err(e) => warn!("Ignoring unreadable manifest in {}: {}", dir.display(), e),
        }

        info!(
            "Loaded knowledge base with {} documents (dimension {}) from {}",
            documents.len(),
            index.dimension(),
            dir.display()
        );

        Ok(Self { index, documents })
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    #[inline]
    pub fn document(&self, position: usize) -> Option<&Document> {
        self.documents.get(position)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| RagError::CorruptIndex {
        path: path.to_path_buf(),
        reason: format!("document list is not a JSON array of strings: {}", e),
    })
}
