// Knowledge base persistence
// Index, documents and manifest are staged together and swapped into place


use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Document;
use crate::index::VectorIndex;
use crate::{RagError, Result};

pub const INDEX_FILE_NAME: &str = "faq_index.bin";
pub const DOCUMENTS_FILE_NAME: &str = "faq_contexts.json";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Build metadata stored next to the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimension: usize,
    pub document_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl Manifest {
    #[inline]
    pub fn new(index: &VectorIndex, embedding_model: &str, source: Option<&Path>) -> Self {
        Self {
            built_at: Utc::now(),
            embedding_model: embedding_model.to_string(),
            dimension: index.dimension(),
            document_count: index.len(),
            source: source.map(Path::to_path_buf),
        }
    }

    /// Read the manifest in `dir`, `None` when the knowledge base has none
    #[inline]
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(&path)?;
        let manifest = serde_json::from_slice(&content).map_err(|e| RagError::CorruptIndex {
            path: path.clone(),
            reason: format!("invalid manifest: {}", e),
        })?;
        Ok(Some(manifest))
    }
}

/// Write the knowledge base into `dir` with all-or-nothing visibility.
///
/// Artifacts are written and synced inside a sibling staging directory, which
/// then replaces `dir`. If anything fails before the swap the previous
/// knowledge base is left as it was.
///
/// # Errors
/// * `InvalidArgument` - if the index and document list disagree in length
/// * `Io` - if writing or swapping fails
#[inline]
pub fn persist(
    dir: &Path,
    index: &VectorIndex,
    documents: &[Document],
    manifest: &Manifest,
) -> Result<()> {
    if index.len() != documents.len() {
        return Err(RagError::InvalidArgument(format!(
            "refusing to persist {} vectors with {} documents",
            index.len(),
            documents.len()
        )));
    }
    if manifest.document_count != documents.len() {
        return Err(RagError::InvalidArgument(format!(
            "manifest records {} documents but {} are being persisted",
            manifest.document_count,
            documents.len()
        )));
    }

    let (parent, name) = split_target(dir)?;
    fs::create_dir_all(&parent)?;

    let staging = parent.join(format!(".{}.staging-{}", name, Uuid::new_v4()));
    fs::create_dir(&staging)?;
    debug!("Staging knowledge base in {}", staging.display());

    if let Err(e) = write_artifacts(&staging, index, documents, manifest) {
        discard(&staging);
        return Err(e);
    }

    if let Err(e) = swap_into_place(&staging, dir, &parent, &name) {
        discard(&staging);
        return Err(e);
    }

    info!(
        "Persisted knowledge base with {} documents to {}",
        documents.len(),
        dir.display()
    );
    Ok(())
}

fn split_target(dir: &Path) -> Result<(PathBuf, String)> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            RagError::InvalidArgument(format!(
                "knowledge base path {} has no usable directory name",
                dir.display()
            ))
        })?
        .to_string();

    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((parent, name))
}

fn write_artifacts(
    staging: &Path,
    index: &VectorIndex,
    documents: &[Document],
    manifest: &Manifest,
) -> Result<()> {
    index.persist(&staging.join(INDEX_FILE_NAME))?;

    let documents_json = serde_json::to_vec_pretty(documents)
        .map_err(|e| RagError::Other(anyhow::Error::new(e)))?;
    write_synced(&staging.join(DOCUMENTS_FILE_NAME), &documents_json)?;

    let manifest_json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| RagError::Other(anyhow::Error::new(e)))?;
    write_synced(&staging.join(MANIFEST_FILE_NAME), &manifest_json)?;

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn swap_into_place(staging: &Path, dir: &Path, parent: &Path, name: &str) -> Result<()> {
    if !dir.exists() {
        fs::rename(staging, dir)?;
        return Ok(());
    }

    let previous = parent.join(format!(".{}.previous-{}", name, Uuid::new_v4()));
    fs::rename(dir, &previous)?;

    if let Err(e) = fs::rename(staging, dir) {
        warn!(
            "Failed to move new knowledge base into place, restoring previous: {}",
            e
        );
        if let Err(restore) = fs::rename(&previous, dir) {
            warn!(
                "Failed to restore previous knowledge base from {}: {}",
                previous.display(),
                restore
            );
        }
        return Err(e.into());
    }

    discard(&previous);
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
