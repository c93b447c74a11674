// crates/core/src/pipeline/local.rs
//! Filesystem-backed extraction collaborators.
//!
//! Documents are plain-text files under a data directory with pages separated
//! by form feeds (`\x0c`). The extractor pulls an outline (headings) out of
//! each chunk; results are written as JSON next to the documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use super::extraction::{Chunk, Document, DocumentSource, ExtractedItem, ResultWriter, UnitExtractor};
use crate::error::PipelineError;

const PAGE_BREAK: char = '\x0c';

/// Reject ids that could escape the data directory.
fn checked_resource_id(resource_id: &str) -> Result<&str, PipelineError> {
    let valid = !resource_id.is_empty()
        && resource_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !resource_id.starts_with('.');
    if valid {
        Ok(resource_id)
    } else {
        Err(PipelineError::Validation(format!(
            "invalid resource id: {resource_id:?}"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, resource_id: &str) -> Result<PathBuf, PipelineError> {
        Ok(self.root.join(format!("{}.txt", checked_resource_id(resource_id)?)))
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn fetch(&self, resource_id: &str) -> Result<Document, PipelineError> {
        let path = self.path_for(resource_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::Validation(format!(
                    "document not found: {resource_id}"
                )));
            }
            Err(e) => {
                return Err(PipelineError::Internal(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        // Blank pages stay so chunk page numbers match the document.
        let pages = text.split(PAGE_BREAK).map(str::to_string).collect();
        Ok(Document { pages })
    }
}

/// Extracts headings: markdown-style `#` lines and `Chapter`/`Unit`/`Section`
/// lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineExtractor;

impl OutlineExtractor {
    fn heading(line: &str) -> Option<(usize, &str)> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('#') {
            let level = 1 + rest.chars().take_while(|c| *c == '#').count();
            let title = rest.trim_start_matches('#').trim();
            return (!title.is_empty()).then_some((level, title));
        }
        ["Chapter ", "Unit ", "Section "]
            .iter()
            .any(|prefix| line.starts_with(prefix))
            .then_some((1, line))
    }
}

#[async_trait]
impl UnitExtractor for OutlineExtractor {
    async fn extract(&self, chunk: &Chunk) -> Result<Vec<ExtractedItem>, PipelineError> {
        let items = chunk
            .text
            .split('\n')
            .filter_map(Self::heading)
            .map(|(level, title)| ExtractedItem {
                key: title.to_lowercase(),
                value: json!({
                    "title": title,
                    "level": level,
                    "first_page": chunk.first_page,
                }),
            })
            .collect();
        Ok(items)
    }
}

#[derive(Debug, Clone)]
pub struct JsonResultWriter {
    root: PathBuf,
}

impl JsonResultWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }
}

#[async_trait]
impl ResultWriter for JsonResultWriter {
    async fn save(
        &self,
        resource_id: &str,
        items: &[ExtractedItem],
    ) -> Result<Vec<String>, PipelineError> {
        let resource_id = checked_resource_id(resource_id)?;
        let dir = self.results_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let name = format!("{resource_id}-{}.json", uuid::Uuid::new_v4().simple());
        let path = dir.join(&name);
        let body = serde_json::to_vec_pretty(&json!({
            "resource_id": resource_id,
            "items": items,
        }))
        .map_err(|e| PipelineError::Internal(format!("failed to encode results: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error(&path, e))?;

        Ok(vec![format!("results/{name}")])
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Internal(format!("failed to write {}: {e}", path.display()))
}
