// crates/core/src/pipeline/chat.rs
//! Token-by-token chat generation.
//!
//! Streams deltas from a [`ChatBackend`], forwarding each one as soon as it
//! arrives, then persists the assembled reply through the backend.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use super::{JobContext, JobOutput, Pipeline, ProgressReporter};
use crate::error::PipelineError;
use crate::event::{Citation, TokenUsage, ToolEvent};
use crate::progress::{Phase, PhaseWeights, Signal};

/// Request body accepted in a job's `input`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: String,
    pub content: String,
}

/// One increment from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Content(String),
    Reasoning(String),
    Citations(Vec<Citation>),
    Usage(TokenUsage),
    Tool(ToolEvent),
}

/// The assembled reply handed back for persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub reasoning: String,
    pub citations: Vec<Citation>,
    pub usage: Option<TokenUsage>,
}

pub type DeltaStream = BoxStream<'static, Result<ChatDelta, PipelineError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, PipelineError>;

    /// Store the finished reply, returning its message id.
    async fn persist(&self, request: &ChatRequest, reply: &ChatReply) -> Result<String, PipelineError>;
}

pub struct ChatGeneration<B> {
    backend: B,
}

impl<B: ChatBackend> ChatGeneration<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

fn parse_request(ctx: &JobContext, input: Value) -> Result<ChatRequest, PipelineError> {
    let mut request: ChatRequest = serde_json::from_value(input)
        .map_err(|e| PipelineError::Validation(format!("invalid chat request: {e}")))?;
    if request.content.trim().is_empty() {
        return Err(PipelineError::Validation("message content is required".into()));
    }
    if request.session_id.is_empty() {
        request.session_id = ctx.resource_id.clone();
    }
    Ok(request)
}

#[async_trait]
impl<B: ChatBackend> Pipeline for ChatGeneration<B> {
    fn weights(&self) -> PhaseWeights {
        PhaseWeights::generation()
    }

    async fn process(
        &self,
        ctx: &JobContext,
        input: Value,
        reporter: &ProgressReporter,
    ) -> Result<JobOutput, PipelineError> {
        let request = parse_request(ctx, input)?;
        reporter
            .report(Signal::phase(Phase::Initializing, 100, "Connecting to model"))
            .await?;

        let mut deltas = self.backend.stream(&request).await?;
        reporter
            .report(Signal::phase(Phase::Generation, 0, "Generating"))
            .await?;

        let mut reply = ChatReply::default();
        loop {
            let delta = tokio::select! {
                _ = ctx.cancelled() => return Err(PipelineError::Cancelled),
                next = deltas.next() => match next {
                    Some(delta) => delta?,
                    None => break,
                },
            };
            let signal = match delta {
                ChatDelta::Content(text) => {
                    reply.content.push_str(&text);
                    Signal::Chunk(text)
                }
                ChatDelta::Reasoning(text) => {
                    reply.reasoning.push_str(&text);
                    Signal::Reasoning(text)
                }
                ChatDelta::Citations(citations) => {
                    reply.citations.extend(citations.iter().cloned());
                    Signal::Citations(citations)
                }
                ChatDelta::Usage(usage) => {
                    reply.usage = Some(usage);
                    Signal::Usage(usage)
                }
                ChatDelta::Tool(tool) => Signal::Tool(tool),
            };
            reporter.report(signal).await?;
        }

        if reply.content.is_empty() {
            return Err(PipelineError::Upstream("model returned an empty response".into()));
        }

        reporter
            .report(Signal::phase(Phase::Generation, 100, "Generated"))
            .await?;
        reporter.report(Signal::phase(Phase::Save, 0, "Saving message")).await?;
        let message_id = self.backend.persist(&request, &reply).await?;
        reporter.report(Signal::phase(Phase::Save, 100, "Saved")).await?;

        tracing::debug!(job_id = %ctx.job_id, chars = reply.content.len(), "chat reply persisted");
        Ok(JobOutput {
            result_refs: vec![message_id],
        })
    }
}
