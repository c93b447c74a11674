// crates/server/src/jobs/manager.rs
//! Job lifecycle manager and task runner.
//!
//! Every job runs on its own task. The manager creates the record, hands out
//! the job's cancellation token, runs the pipeline with a bus of subscribers
//! (store mirror first, then the transport if one is attached) and writes the
//! single terminal transition.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use jobstream_core::{
    failure_from, snapshot_event, ErrorInfo, EventBus, EventPayload, EventSink, JobContext, JobId,
    JobOutput, JobRecord, JobStatus, JobStore, NewJob, Pipeline, PipelineError, PipelineRegistry,
    ProgressEvent, ProgressReporter, StoreError, StoreMirror, Subscriber, TransportAdapter,
    UserId, CANCELLED_MESSAGE,
};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A start request resolved against the registry.
#[derive(Debug, Clone)]
pub struct StartJob {
    pub user_id: UserId,
    pub capability: String,
    pub resource_id: String,
    pub input: Value,
}

/// A created job whose task has not been spawned yet.
pub struct PreparedJob {
    record: JobRecord,
    pipeline: Arc<dyn Pipeline>,
    input: Value,
    token: CancellationToken,
}

impl PreparedJob {
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn job_id(&self) -> &JobId {
        &self.record.job_id
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    registry: PipelineRegistry,
    /// Tokens of jobs whose task runs in this process.
    tokens: DashMap<JobId, CancellationToken>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, registry: PipelineRegistry) -> Self {
        Self {
            store,
            registry,
            tokens: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Number of jobs with a live task in this process.
    pub fn running(&self) -> usize {
        self.tokens.len()
    }

    /// Create the job record and supersede the user's previous active job.
    ///
    /// Nothing is created for an unknown capability or an empty resource id.
    pub async fn start(&self, request: StartJob) -> ApiResult<PreparedJob> {
        let pipeline = self.registry.get(&request.capability)?;
        if request.resource_id.trim().is_empty() {
            return Err(ApiError::BadRequest("resource_id is required".into()));
        }

        let created = self
            .store
            .create_job(NewJob {
                user_id: request.user_id.clone(),
                resource_id: request.resource_id,
                capability: request.capability.clone(),
            })
            .await?;

        if let Some(previous) = &created.superseded {
            tracing::info!(
                job_id = %previous,
                superseded_by = %created.record.job_id,
                user_id = %request.user_id,
                "superseding active job"
            );
            metrics::record_superseded();
            if let Err(e) = self.cancel(previous).await {
                if !e.is_not_found() {
                    tracing::warn!(job_id = %previous, error = %e, "failed to cancel superseded job");
                }
            }
        }

        let token = CancellationToken::new();
        self.tokens.insert(created.record.job_id.clone(), token.clone());
        metrics::record_job_started(&request.capability);
        tracing::info!(
            job_id = %created.record.job_id,
            user_id = %request.user_id,
            capability = %request.capability,
            "job created"
        );

        Ok(PreparedJob {
            record: created.record,
            pipeline,
            input: request.input,
            token,
        })
    }

    /// Run the job with `sink` attached. A client that is gone before the
    /// `started` event lands cancels the job without running the pipeline.
    pub fn spawn_streaming<S>(self: &Arc<Self>, job: PreparedJob, sink: S)
    where
        S: EventSink + 'static,
    {
        let manager = Arc::clone(self);
        let span = job_span(&job.record);
        tokio::spawn(
            async move {
                let attached = TransportAdapter::attach(
                    &job.record,
                    sink,
                    manager.store.clone(),
                    job.token.clone(),
                )
                .await;
                match attached {
                    Ok(adapter) => {
                        let transport: Arc<dyn Subscriber> = Arc::new(adapter);
                        manager.execute(job, Some(transport)).await;
                    }
                    Err(e) => manager.abandon(job, e).await,
                }
            }
            .instrument(span),
        );
    }

    /// Run the job with no transport. It runs to its terminal state and is
    /// observed by polling or reconnecting.
    pub fn spawn_detached(self: &Arc<Self>, job: PreparedJob) {
        let manager = Arc::clone(self);
        let span = job_span(&job.record);
        tokio::spawn(async move { manager.execute(job, None).await }.instrument(span));
    }

    /// Request cancellation. Wakes the local task if there is one; the store
    /// flag covers everything else. Terminal jobs are returned unchanged.
    pub async fn cancel(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        if let Some(token) = self.tokens.get(job_id) {
            token.cancel();
        }
        self.store.request_cancel(job_id).await
    }

    async fn execute(&self, job: PreparedJob, transport: Option<Arc<dyn Subscriber>>) {
        let PreparedJob {
            record,
            pipeline,
            input,
            token,
        } = job;
        let started = Instant::now();

        let mut bus = EventBus::new().with(Arc::new(StoreMirror::new(self.store.clone())));
        if let Some(transport) = transport {
            bus.subscribe(transport);
        }

        let reporter = ProgressReporter::new(
            record.job_id.clone(),
            pipeline.weights(),
            token.clone(),
            bus.clone(),
        );
        let ctx = JobContext::new(
            record.job_id.clone(),
            record.user_id.clone(),
            record.resource_id.clone(),
            token,
        );

        let outcome = pipeline.process(&ctx, input, &reporter).await;
        if let Err(e) = &outcome {
            if !e.is_cancellation() {
                tracing::warn!(job_id = %record.job_id, error = %e, "pipeline failed");
            }
        }

        let terminal = self.finalize(&record.job_id, &outcome).await;
        if let Err(e) = bus.publish(&terminal).await {
            tracing::debug!(job_id = %record.job_id, error = %e, "terminal event not delivered");
        }

        self.finish(&record, terminal_status(&terminal), started);
    }

    async fn abandon(&self, job: PreparedJob, reason: PipelineError) {
        tracing::info!(job_id = %job.record.job_id, reason = %reason, "client gone before start");
        if let Err(e) = self.store.mark_cancelled(&job.record.job_id).await {
            tracing::error!(job_id = %job.record.job_id, error = %e, "failed to record cancellation");
        }
        self.finish(&job.record, JobStatus::Cancelled, Instant::now());
    }

    /// Write the terminal transition and build the event that ends the stream.
    ///
    /// The event reflects what the store holds, so a job cancelled before its
    /// pipeline returned ends as cancelled even if the pipeline succeeded.
    async fn finalize(
        &self,
        job_id: &JobId,
        outcome: &Result<JobOutput, PipelineError>,
    ) -> ProgressEvent {
        let written = match outcome {
            Ok(output) => self.store.set_result(job_id, &output.result_refs).await,
            Err(e) if e.is_cancellation() => self.store.mark_cancelled(job_id).await,
            Err(e) => self.store.fail(job_id, &failure_from(e)).await,
        };

        match written {
            Ok(record) => snapshot_event(&record),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to record terminal status");
                outcome_event(job_id, outcome)
            }
        }
    }

    fn finish(&self, record: &JobRecord, status: JobStatus, started: Instant) {
        self.tokens.remove(&record.job_id);
        metrics::record_job_finished(&record.capability, status, started.elapsed());
        tracing::info!(
            job_id = %record.job_id,
            capability = %record.capability,
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );
    }
}

fn job_span(record: &JobRecord) -> tracing::Span {
    tracing::info_span!("job", job_id = %record.job_id, capability = %record.capability)
}

/// Terminal event built from the pipeline outcome alone, for when the store
/// could not be written.
fn outcome_event(job_id: &JobId, outcome: &Result<JobOutput, PipelineError>) -> ProgressEvent {
    let payload = match outcome {
        Ok(output) => EventPayload::Complete {
            progress: 100,
            result_refs: output.result_refs.clone(),
        },
        Err(e) if e.is_cancellation() => EventPayload::Error(ErrorInfo {
            status: JobStatus::Cancelled,
            kind: None,
            message: CANCELLED_MESSAGE.to_string(),
            recoverable: false,
        }),
        Err(e) => {
            let failure = failure_from(e);
            EventPayload::Error(ErrorInfo {
                status: JobStatus::Failed,
                kind: Some(failure.kind),
                message: failure.message,
                recoverable: failure.recoverable,
            })
        }
    };
    ProgressEvent::new(job_id.clone(), payload)
}

fn terminal_status(event: &ProgressEvent) -> JobStatus {
    match &event.payload {
        EventPayload::Error(info) => info.status,
        _ => JobStatus::Completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobstream_core::{Phase, PhaseWeights, Signal};
    use jobstream_db::Database;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Reports once, then waits for cancellation or for `release`.
    struct Gated {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Pipeline for Gated {
        fn weights(&self) -> PhaseWeights {
            PhaseWeights::extraction()
        }

        async fn process(
            &self,
            ctx: &JobContext,
            _input: Value,
            reporter: &ProgressReporter,
        ) -> Result<JobOutput, PipelineError> {
            reporter.report(Signal::phase(Phase::Download, 50, "fetching")).await?;
            tokio::select! {
                _ = ctx.cancelled() => Err(PipelineError::Cancelled),
                _ = self.release.notified() => Ok(JobOutput { result_refs: vec!["out-1".into()] }),
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl Pipeline for Failing {
        fn weights(&self) -> PhaseWeights {
            PhaseWeights::extraction()
        }

        async fn process(
            &self,
            _ctx: &JobContext,
            _input: Value,
            _reporter: &ProgressReporter,
        ) -> Result<JobOutput, PipelineError> {
            Err(PipelineError::Validation("document has no pages".into()))
        }
    }

    async fn manager() -> (Arc<JobManager>, Arc<Gated>, Arc<dyn JobStore>) {
        let store: Arc<dyn JobStore> = Arc::new(Database::new_in_memory().await.unwrap());
        let gated = Arc::new(Gated {
            release: tokio::sync::Notify::new(),
        });
        let mut registry = PipelineRegistry::new();
        registry.register("gated", gated.clone()).unwrap();
        registry.register("failing", Arc::new(Failing)).unwrap();
        (
            Arc::new(JobManager::new(store.clone(), registry)),
            gated,
            store,
        )
    }

    fn request(user: &str, capability: &str) -> StartJob {
        StartJob {
            user_id: user.into(),
            capability: capability.into(),
            resource_id: "doc-1".into(),
            input: Value::Null,
        }
    }

    async fn wait_for(store: &Arc<dyn JobStore>, id: &JobId, status: JobStatus) -> JobRecord {
        for _ in 0..200 {
            let record = store.get_job(id).await.unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_unknown_capability_creates_nothing() {
        let (jobs, _, store) = manager().await;
        let err = jobs.start(request("u-1", "translate")).await.err().unwrap();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(store.get_active_job(&"u-1".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_resource_is_rejected() {
        let (jobs, _, _) = manager().await;
        let mut req = request("u-1", "gated");
        req.resource_id = "  ".into();
        assert!(matches!(jobs.start(req).await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_detached_job_completes() {
        let (jobs, gated, store) = manager().await;
        let job = jobs.start(request("u-1", "gated")).await.unwrap();
        let id = job.job_id().clone();
        jobs.spawn_detached(job);

        wait_for(&store, &id, JobStatus::Running).await;
        gated.release.notify_one();
        let record = wait_for(&store, &id, JobStatus::Completed).await;
        assert_eq!(record.result_refs, Some(vec!["out-1".to_string()]));
        assert_eq!(store.get_active_job(&"u-1".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_start_supersedes_first() {
        let (jobs, _, store) = manager().await;
        let first = jobs.start(request("u-1", "gated")).await.unwrap();
        let first_id = first.job_id().clone();
        jobs.spawn_detached(first);
        wait_for(&store, &first_id, JobStatus::Running).await;

        let second = jobs.start(request("u-1", "gated")).await.unwrap();
        let second_id = second.job_id().clone();
        jobs.spawn_detached(second);

        wait_for(&store, &first_id, JobStatus::Cancelled).await;
        assert_eq!(
            store.get_active_job(&"u-1".to_string()).await.unwrap(),
            Some(second_id)
        );
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let (jobs, _, store) = manager().await;
        let job = jobs.start(request("u-1", "failing")).await.unwrap();
        let id = job.job_id().clone();
        jobs.spawn_detached(job);

        let record = wait_for(&store, &id, JobStatus::Failed).await;
        let error = record.error.unwrap();
        assert_eq!(error.kind, jobstream_core::ErrorKind::Validation);
        assert!(!error.recoverable);
    }

    #[tokio::test]
    async fn test_cancel_running_job_wakes_task() {
        let (jobs, _, store) = manager().await;
        let job = jobs.start(request("u-1", "gated")).await.unwrap();
        let id = job.job_id().clone();
        jobs.spawn_detached(job);
        wait_for(&store, &id, JobStatus::Running).await;

        let ack = jobs.cancel(&id).await.unwrap();
        assert!(ack.cancel_requested);
        wait_for(&store, &id, JobStatus::Cancelled).await;

        for _ in 0..100 {
            if jobs.running() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(jobs.running(), 0);
    }

    #[test]
    fn test_outcome_event_without_store() {
        let id = JobId::from("j-1");
        let event = outcome_event(&id, &Err(PipelineError::Disconnected));
        assert_eq!(terminal_status(&event), JobStatus::Cancelled);

        let event = outcome_event(&id, &Err(PipelineError::Upstream("status 503".into())));
        match event.payload {
            EventPayload::Error(info) => {
                assert_eq!(info.status, JobStatus::Failed);
                assert!(info.recoverable);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let event = outcome_event(&id, &Ok(JobOutput::default()));
        assert_eq!(terminal_status(&event), JobStatus::Completed);
    }
}
