// crates/core/src/pipeline/extraction.rs
//! Chunked document extraction.
//!
//! download -> chunk pages -> extract each chunk -> merge -> save.
//!
//! Chunks are extracted with bounded concurrency. A chunk that keeps failing
//! with a transient error is skipped with a warning event; any other error
//! fails the job. Each attempt is bounded by `chunk_timeout` and retries back
//! off exponentially from `retry_backoff`. Cancellation is checked before each
//! attempt, during backoff and on every report.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobContext, JobOutput, Pipeline, ProgressReporter};
use crate::classify::classify;
use crate::error::PipelineError;
use crate::progress::{Phase, PhaseWeights, Signal};

/// A fetched document, one string per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub pages: Vec<String>,
}

/// Consecutive pages extracted together. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub first_page: usize,
    pub last_page: usize,
    pub text: String,
}

/// One extracted item. Items sharing a `key` are merged into the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub key: String,
    pub value: Value,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, resource_id: &str) -> Result<Document, PipelineError>;
}

#[async_trait]
pub trait UnitExtractor: Send + Sync {
    async fn extract(&self, chunk: &Chunk) -> Result<Vec<ExtractedItem>, PipelineError>;
}

#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// Persist merged items, returning references to what was stored.
    async fn save(&self, resource_id: &str, items: &[ExtractedItem])
        -> Result<Vec<String>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub pages_per_chunk: usize,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    pub concurrency: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
    /// Upper bound on a single extraction attempt.
    pub chunk_timeout: Duration,
}

impl ExtractionOptions {
    /// Delay before retry number `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(1 << attempt.min(16))
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            pages_per_chunk: 4,
            max_retries: 2,
            concurrency: 3,
            retry_backoff: Duration::from_secs(1),
            chunk_timeout: Duration::from_secs(90),
        }
    }
}

pub struct ChunkedExtraction<S, X, W> {
    source: S,
    extractor: X,
    writer: W,
    options: ExtractionOptions,
}

impl<S, X, W> ChunkedExtraction<S, X, W>
where
    S: DocumentSource,
    X: UnitExtractor,
    W: ResultWriter,
{
    pub fn new(source: S, extractor: X, writer: W) -> Self {
        Self {
            source,
            extractor,
            writer,
            options: ExtractionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// Extract one chunk, retrying transient failures.
    ///
    /// `Ok(None)` means the chunk was skipped after exhausting retries.
    async fn extract_chunk(
        &self,
        ctx: &JobContext,
        chunk: &Chunk,
        reporter: &ProgressReporter,
    ) -> Result<Option<Vec<ExtractedItem>>, PipelineError> {
        let max_retries = self.options.max_retries;
        let mut attempt = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let outcome =
                match tokio::time::timeout(self.options.chunk_timeout, self.extractor.extract(chunk))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(PipelineError::Upstream(format!(
                        "extraction timed out after {}s",
                        self.options.chunk_timeout.as_secs_f32()
                    ))),
                };
            match outcome {
                Ok(items) => return Ok(Some(items)),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) if classify(&e).1 => {
                    let retry_count = attempt + 1;
                    let exhausted = attempt >= max_retries;
                    let message = if exhausted {
                        format!(
                            "Skipped pages {}-{} after {} attempts: {e}",
                            chunk.first_page, chunk.last_page, retry_count
                        )
                    } else {
                        format!(
                            "Pages {}-{} failed, retrying: {e}",
                            chunk.first_page, chunk.last_page
                        )
                    };
                    tracing::warn!(job_id = %ctx.job_id, chunk = chunk.index, attempt = retry_count, error = %e, "chunk extraction failed");
                    reporter
                        .report(Signal::Warning {
                            phase: Phase::Extraction,
                            message,
                            retry_count: retry_count.min(max_retries),
                            max_retries,
                        })
                        .await?;
                    if exhausted {
                        return Ok(None);
                    }
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(self.options.backoff(attempt)) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Group pages into chunks of `pages_per_chunk`.
pub fn plan_chunks(pages: &[String], pages_per_chunk: usize) -> Vec<Chunk> {
    let size = pages_per_chunk.max(1);
    pages
        .chunks(size)
        .enumerate()
        .map(|(index, group)| {
            let first_page = index * size + 1;
            Chunk {
                index,
                first_page,
                last_page: first_page + group.len() - 1,
                text: group.join("\n"),
            }
        })
        .collect()
}

/// Concatenate per-chunk results in chunk order, keeping the first item for
/// each key.
pub fn merge_items(mut per_chunk: Vec<(usize, Vec<ExtractedItem>)>) -> Vec<ExtractedItem> {
    per_chunk.sort_by_key(|(index, _)| *index);
    let mut seen = std::collections::HashSet::new();
    per_chunk
        .into_iter()
        .flat_map(|(_, items)| items)
        .filter(|item| seen.insert(item.key.clone()))
        .collect()
}

#[async_trait]
impl<S, X, W> Pipeline for ChunkedExtraction<S, X, W>
where
    S: DocumentSource,
    X: UnitExtractor,
    W: ResultWriter,
{
    fn weights(&self) -> PhaseWeights {
        PhaseWeights::extraction()
    }

    async fn process(
        &self,
        ctx: &JobContext,
        _input: Value,
        reporter: &ProgressReporter,
    ) -> Result<JobOutput, PipelineError> {
        reporter
            .report(Signal::phase(Phase::Initializing, 100, "Starting extraction"))
            .await?;

        reporter
            .report(Signal::phase(Phase::Download, 0, "Downloading document"))
            .await?;
        let document = self.source.fetch(&ctx.resource_id).await?;
        if document.pages.is_empty() {
            return Err(PipelineError::Validation("document has no pages".into()));
        }
        reporter
            .report(Signal::phase(
                Phase::Download,
                100,
                format!("Downloaded {} pages", document.pages.len()),
            ))
            .await?;

        let chunks = plan_chunks(&document.pages, self.options.pages_per_chunk);
        let total = chunks.len() as u32;
        reporter
            .report(Signal::phase(
                Phase::Chunking,
                100,
                format!("Planned {total} chunks"),
            ))
            .await?;
        reporter
            .report(Signal::units(Phase::Extraction, 0, total, "Extracting"))
            .await?;

        let mut results = stream::iter(chunks)
            .map(move |chunk: Chunk| async move {
                let items = self.extract_chunk(ctx, &chunk, reporter).await?;
                Ok::<_, PipelineError>((chunk, items))
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut extracted = Vec::with_capacity(total as usize);
        let mut skipped = 0u32;
        let mut done = 0u32;
        while let Some(result) = results.next().await {
            let (chunk, items) = result?;
            done += 1;
            match items {
                Some(items) => extracted.push((chunk.index, items)),
                None => skipped += 1,
            }
            reporter
                .report(Signal::units(
                    Phase::Extraction,
                    done,
                    total,
                    format!("Extracted pages {}-{}", chunk.first_page, chunk.last_page),
                ))
                .await?;
        }
        drop(results);

        if skipped == total {
            return Err(PipelineError::Upstream(format!(
                "all {total} chunks failed extraction"
            )));
        }

        reporter
            .report(Signal::phase(Phase::Merge, 0, "Merging results"))
            .await?;
        let items = merge_items(extracted);
        if items.is_empty() {
            return Err(PipelineError::Validation(
                "no items could be extracted from the document".into(),
            ));
        }
        reporter
            .report(Signal::phase(
                Phase::Merge,
                100,
                format!("Merged {} items", items.len()),
            ))
            .await?;

        reporter.report(Signal::phase(Phase::Save, 0, "Saving")).await?;
        let result_refs = self.writer.save(&ctx.resource_id, &items).await?;
        reporter.report(Signal::phase(Phase::Save, 100, "Saved")).await?;

        tracing::info!(
            job_id = %ctx.job_id,
            chunks = total,
            skipped,
            items = items.len(),
            "extraction finished"
        );
        Ok(JobOutput { result_refs })
    }
}
