// src/core/scheduler.rs — Cycle scheduler
//
// The single-writer control loop: Discovering → Dispatching →
// Validating → Synthesizing? → Checkpointing, forever. All mutation of
// `EngineState` happens here; the coordinator and ledger hand back
// outcomes and snapshots that get folded in before the checkpoint.
// Concurrency lives only inside the Validating phase, joined before
// the cycle proceeds, so no two cycles ever overlap. A termination
// signal is observed between phases and before each idle sleep, then a
// final checkpoint is forced.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::checkpoint::CheckpointStore;
use super::state::EngineState;
use crate::backend::dispatch::Dispatcher;
use crate::backend::quota::QuotaLedger;
use crate::backend::Capability;
use crate::docs::{ArtifactKind, DocumentStore};
use crate::infra::config::Config;
use crate::infra::errors::ArfError;
use crate::pipeline::{PipelineJob, ReasoningPipeline};
use crate::sources::InputSource;
use crate::validate::sandbox::SandboxExecutor;
use crate::validate::ValidationCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Discovering,
    Dispatching,
    Validating,
    Synthesizing,
    Checkpointing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Discovering => "discovering",
            Phase::Dispatching => "dispatching",
            Phase::Validating => "validating",
            Phase::Synthesizing => "synthesizing",
            Phase::Checkpointing => "checkpointing",
        };
        write!(f, "{s}")
    }
}

/// What one cycle did, for logging and for the caller's sleep decision.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub dispatched: usize,
    pub validated: usize,
    pub synthesized: bool,
    /// Set when a phase failed and the cycle fell through to its
    /// checkpoint early; the loop cools down instead of idling.
    pub error: Option<String>,
    pub idle: Duration,
}

pub struct Engine {
    config: Config,
    store: CheckpointStore,
    pub state: EngineState,
    dispatcher: Dispatcher,
    ledger: QuotaLedger,
    executor: Arc<SandboxExecutor>,
    coordinator: ValidationCoordinator,
    source: Arc<dyn InputSource>,
    pipeline: Arc<dyn ReasoningPipeline>,
    docs: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    /// Build an engine, resuming from the checkpoint at
    /// `checkpoint_path` if one exists. `active_experiments` is always
    /// rebuilt empty, so requests in flight at crash time retry.
    pub fn new(
        config: Config,
        checkpoint_path: std::path::PathBuf,
        sandbox_root: std::path::PathBuf,
        source: Arc<dyn InputSource>,
        pipeline: Arc<dyn ReasoningPipeline>,
        docs: Arc<dyn DocumentStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let store = CheckpointStore::new(checkpoint_path);
        let state = store.load();

        let dispatcher = Dispatcher::new(config.backends.clone());
        let ledger = QuotaLedger::new(dispatcher.limits()).with_usage(state.usage_stats.clone());

        let executor = Arc::new(SandboxExecutor::new(
            sandbox_root,
            config.sandbox.interpreter.clone(),
            Duration::from_secs(config.sandbox.retention_hours * 3600),
        ));
        let coordinator = ValidationCoordinator::new(
            executor.clone(),
            config.engine.max_concurrent_validations,
            Duration::from_secs(config.sandbox.timeout_secs),
        );

        Self {
            config,
            store,
            state,
            dispatcher,
            ledger,
            executor,
            coordinator,
            source,
            pipeline,
            docs,
            shutdown,
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Idle duration for the coming sleep: favor responsiveness while
    /// work is pending, back off when quiet.
    pub fn idle_duration(&self) -> Duration {
        let e = &self.config.engine;
        if !self.state.pending_validations.is_empty() {
            Duration::from_secs(e.idle_active_secs)
        } else if !self.state.comment_queue.is_empty() {
            Duration::from_secs(e.idle_comments_secs)
        } else {
            Duration::from_secs(e.idle_quiet_secs)
        }
    }

    fn should_synthesize(&self, now: chrono::DateTime<Utc>) -> bool {
        self.state.pending_validations.len() > self.config.engine.synthesis_pending_threshold
            || self.state.hours_since_checkpoint(now) > self.config.engine.synthesis_interval_hours
    }

    /// One full cycle. Phase failures never escape: they are logged,
    /// the checkpoint still runs, and the summary carries the error so
    /// the loop applies its cooldown instead of the idle sleep.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let mut summary = CycleSummary {
            dispatched: 0,
            validated: 0,
            synthesized: false,
            error: None,
            idle: Duration::ZERO,
        };

        if let Err(e) = self.run_phases(&mut summary).await {
            tracing::error!("Cycle failed: {}", e);
            summary.error = Some(e.to_string());
        }

        // Checkpointing runs unconditionally, success or caught failure.
        if let Err(e) = self.commit_checkpoint().await {
            tracing::error!(phase = %Phase::Checkpointing, "Checkpoint save failed: {}", e);
            summary.error.get_or_insert_with(|| e.to_string());
        }

        summary.idle = if summary.error.is_some() {
            Duration::from_secs(self.config.engine.cooldown_secs)
        } else {
            self.idle_duration()
        };
        summary
    }

    async fn run_phases(&mut self, summary: &mut CycleSummary) -> Result<(), ArfError> {
        let discovered = self.discover().await?;
        if self.shutdown_requested() {
            return Ok(());
        }

        summary.dispatched = self.dispatch(discovered).await?;
        if self.shutdown_requested() {
            return Ok(());
        }

        summary.validated = self.validate().await?;
        if self.shutdown_requested() {
            return Ok(());
        }

        summary.synthesized = self.synthesize().await?;
        Ok(())
    }

    /// Discovering: collect unseen input ids, pull unanswered comments
    /// into the comment queue, and list unseen references. Anything
    /// already in `processed_inputs` is skipped here and never reaches
    /// the pipeline again.
    async fn discover(&mut self) -> Result<Discovered, ArfError> {
        let phase = Phase::Discovering;

        let inputs: Vec<String> = self
            .source
            .list_new()
            .await?
            .into_iter()
            .filter(|id| !self.state.is_processed(id))
            .collect();

        for comment in self.docs.pending_comments().await? {
            let key = format!("comment:{}", comment.id);
            let queued = self.state.comment_queue.iter().any(|c| c.id == comment.id);
            if !self.state.is_processed(&key) && !queued {
                self.state.comment_queue.push_back(comment);
            }
        }

        let references: Vec<crate::docs::Reference> = self
            .docs
            .unprocessed_references()
            .await?
            .into_iter()
            .filter(|r| !self.state.is_processed(&format!("ref:{}", r.id)))
            .collect();

        if !inputs.is_empty() {
            tracing::info!(phase = %phase, count = inputs.len(), "New inputs found");
        }
        Ok(Discovered { inputs, references })
    }

    /// Dispatching: one pipeline call per work item, sequentially. An
    /// item is recorded as processed only after its call succeeds; a
    /// failure leaves it un-recorded for retry next cycle.
    async fn dispatch(&mut self, discovered: Discovered) -> Result<usize, ArfError> {
        let phase = Phase::Dispatching;
        let mut dispatched = 0;

        for input_id in discovered.inputs {
            if self.shutdown_requested() {
                return Ok(dispatched);
            }
            let content = match self.source.read(&input_id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(phase = %phase, item = %input_id, "Read failed, will retry: {}", e);
                    continue;
                }
            };
            let backend = self
                .dispatcher
                .select(Capability::Extraction, &self.ledger, Utc::now());
            let job = PipelineJob::Ingest {
                input_id: input_id.clone(),
                content,
            };
            match self.pipeline.process(job, &backend).await {
                Ok(result) => {
                    self.ledger
                        .record_usage(&backend.name, result.tokens_used, Utc::now());
                    self.fold_pipeline_result(result);
                    self.state.mark_processed(&input_id);
                    dispatched += 1;
                }
                Err(e) => log_pipeline_failure(phase, &input_id, &e),
            }
        }

        dispatched += self.dispatch_comments().await;
        dispatched += self.dispatch_references(discovered.references).await;
        Ok(dispatched)
    }

    async fn dispatch_comments(&mut self) -> usize {
        let phase = Phase::Dispatching;
        let mut handled = 0;
        let queued: Vec<_> = self.state.comment_queue.iter().cloned().collect();

        for comment in queued {
            if self.shutdown_requested() {
                break;
            }
            let backend = self
                .dispatcher
                .select(Capability::Reasoning, &self.ledger, Utc::now());
            let job = PipelineJob::Comment {
                id: comment.id.clone(),
                text: comment.text.clone(),
            };
            let result = match self.pipeline.process(job, &backend).await {
                Ok(r) => r,
                Err(e) => {
                    log_pipeline_failure(phase, &comment.id, &e);
                    continue;
                }
            };
            self.ledger
                .record_usage(&backend.name, result.tokens_used, Utc::now());

            let response = result.prose.unwrap_or_default();
            match self
                .docs
                .append_artifact(ArtifactKind::CommentResponse, &comment.id, &response)
                .await
            {
                Ok(_) => {
                    // Drained only after the response is durably recorded.
                    self.state.comment_queue.retain(|c| c.id != comment.id);
                    self.state.mark_processed(format!("comment:{}", comment.id));
                    handled += 1;
                }
                Err(e) => {
                    tracing::warn!(phase = %phase, item = %comment.id, "Artifact write failed, will retry: {}", e);
                }
            }
        }
        handled
    }

    async fn dispatch_references(&mut self, references: Vec<crate::docs::Reference>) -> usize {
        let phase = Phase::Dispatching;
        let mut handled = 0;

        for reference in references {
            if self.shutdown_requested() {
                break;
            }
            let backend = self
                .dispatcher
                .select(Capability::Reasoning, &self.ledger, Utc::now());
            let job = PipelineJob::Reference {
                id: reference.id.clone(),
                url: reference.url.clone(),
            };
            let result = match self.pipeline.process(job, &backend).await {
                Ok(r) => r,
                Err(e) => {
                    log_pipeline_failure(phase, &reference.id, &e);
                    continue;
                }
            };
            self.ledger
                .record_usage(&backend.name, result.tokens_used, Utc::now());

            let extract = result.prose.unwrap_or_default();
            match self
                .docs
                .append_artifact(ArtifactKind::Citation, &reference.id, &extract)
                .await
            {
                Ok(_) => {
                    self.state.mark_processed(format!("ref:{}", reference.id));
                    handled += 1;
                }
                Err(e) => {
                    tracing::warn!(phase = %phase, item = %reference.id, "Artifact write failed, will retry: {}", e);
                }
            }
        }
        handled
    }

    fn fold_pipeline_result(&mut self, result: crate::pipeline::PipelineResult) {
        if !result.concepts.is_empty() {
            tracing::info!(count = result.concepts.len(), "Concepts extracted");
        }
        for request in result.new_validations {
            tracing::info!(request = %request.id, hypothesis = %request.hypothesis, "Validation queued");
            self.state.queue_validation(request);
        }
        for question in result.questions {
            self.state.pending_questions.push_back(question);
        }
    }

    /// Validating: hand the head of the queue (up to the admission
    /// cap) to the coordinator, persist each outcome as artifacts, and
    /// only then drop the request. Excess requests stay queued.
    async fn validate(&mut self) -> Result<usize, ArfError> {
        let phase = Phase::Validating;
        let cap = self.config.engine.max_concurrent_validations;
        let batch: Vec<_> = self
            .state
            .pending_validations
            .iter()
            .take(cap)
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }

        tracing::info!(phase = %phase, batch = batch.len(), queued = self.state.pending_validations.len(), "Running validations");
        for request in &batch {
            self.state.active_experiments.insert(request.id.clone());
        }

        let outcomes = self.coordinator.run_batch(batch.clone()).await;

        let mut completed = 0;
        for outcome in outcomes {
            let appendix = self
                .docs
                .append_artifact(
                    ArtifactKind::ValidationAppendix,
                    &outcome.request_id,
                    &outcome.raw_output,
                )
                .await;
            match appendix {
                Ok(artifact_ref) => {
                    let hypothesis = batch
                        .iter()
                        .find(|r| r.id == outcome.request_id)
                        .map(|r| r.hypothesis.as_str())
                        .unwrap_or("?");
                    let summary = format!(
                        "- [{}] {}: {} (see {})",
                        if outcome.success { "ok" } else { "failed" },
                        hypothesis,
                        outcome.summary,
                        artifact_ref
                    );
                    if let Err(e) = self
                        .docs
                        .append_artifact(ArtifactKind::ValidationSummary, &outcome.request_id, &summary)
                        .await
                    {
                        tracing::warn!(phase = %phase, item = %outcome.request_id, "Summary write failed: {}", e);
                    }
                    // Terminal outcome is durable — drop the request.
                    // One attempt per request: failures are not requeued.
                    self.state.complete_validation(&outcome.request_id);
                    completed += 1;
                }
                Err(e) => {
                    // Not durable: leave the request queued for retry.
                    tracing::warn!(phase = %phase, item = %outcome.request_id, "Appendix write failed, request stays queued: {}", e);
                    self.state.active_experiments.remove(&outcome.request_id);
                }
            }
        }
        Ok(completed)
    }

    /// Synthesizing: full-review pass when the backlog is deep or the
    /// last checkpoint is old. Bumps the framework version on success
    /// only.
    async fn synthesize(&mut self) -> Result<bool, ArfError> {
        let phase = Phase::Synthesizing;
        let now = Utc::now();
        if !self.should_synthesize(now) {
            return Ok(false);
        }

        tracing::info!(phase = %phase, version = self.state.framework_version, "Running synthesis");
        let backend = self
            .dispatcher
            .select(Capability::Synthesis, &self.ledger, now);
        let job = PipelineJob::FullReview {
            framework_version: self.state.framework_version,
        };
        match self.pipeline.process(job, &backend).await {
            Ok(result) => {
                self.ledger
                    .record_usage(&backend.name, result.tokens_used, Utc::now());
                self.state.bump_framework_version();
                if let Some(prose) = result.prose {
                    let id = format!("v{}", self.state.framework_version);
                    if let Err(e) = self
                        .docs
                        .append_artifact(ArtifactKind::Synthesis, &id, &prose)
                        .await
                    {
                        tracing::warn!(phase = %phase, "Synthesis artifact write failed: {}", e);
                    }
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(phase = %phase, "Synthesis failed, version unchanged: {}", e);
                Ok(false)
            }
        }
    }

    /// Checkpointing: flush the questions feed, fold the ledger
    /// snapshot into state, and persist atomically.
    async fn commit_checkpoint(&mut self) -> Result<(), ArfError> {
        if !self.state.pending_questions.is_empty() {
            let feed: String = self
                .state
                .pending_questions
                .iter()
                .map(|q| format!("- {q}\n"))
                .collect();
            if let Err(e) = self
                .docs
                .append_artifact(ArtifactKind::Questions, "questions", &feed)
                .await
            {
                tracing::warn!("Questions feed write failed: {}", e);
            }
        }

        self.state.usage_stats = self.ledger.snapshot();
        self.state.touch_checkpoint(Utc::now());
        self.store.save(&self.state)?;
        Ok(())
    }

    /// The continuous loop: cycle, sleep adaptively, repeat until a
    /// termination signal, then force a final checkpoint and reclaim
    /// sandbox leftovers.
    pub async fn run_forever(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            framework_version = self.state.framework_version,
            pending = self.state.pending_validations.len(),
            "Engine starting"
        );

        // Self-healing for environments orphaned by a previous crash.
        if let Ok(reaped) = self.executor.reap_stale().await {
            if reaped > 0 {
                tracing::info!(reaped, "Reclaimed stale sandbox environments");
            }
        }

        while !self.shutdown_requested() {
            let summary = self.run_cycle().await;
            tracing::info!(
                dispatched = summary.dispatched,
                validated = summary.validated,
                synthesized = summary.synthesized,
                error = summary.error.as_deref().unwrap_or(""),
                idle_secs = summary.idle.as_secs(),
                "Cycle complete"
            );

            if self.shutdown_requested() {
                break;
            }
            let sleep = tokio::time::sleep(summary.idle);
            tokio::pin!(sleep);
            let mut rx = self.shutdown.clone();
            tokio::select! {
                _ = &mut sleep => {}
                _ = rx.changed() => {}
            }
        }

        tracing::info!("Termination signal observed; writing final checkpoint");
        if let Err(e) = self.commit_checkpoint().await {
            tracing::error!("Final checkpoint failed: {}", e);
        }
        if let Err(e) = self.executor.reap_stale().await {
            tracing::warn!("Final sandbox reclamation failed: {}", e);
        }
        tracing::info!("Shutdown complete; state saved for resume");
        Ok(())
    }
}

/// A failed work item stays queued and is retried next cycle no matter
/// what; the severity reflects whether that retry has any hope, so an
/// item wedged on a permanent failure surfaces for operator replay.
fn log_pipeline_failure(phase: Phase, item: &str, error: &ArfError) {
    if error.is_recoverable() {
        tracing::warn!(phase = %phase, item = %item, "Pipeline failed, will retry: {}", error);
    } else {
        tracing::error!(phase = %phase, item = %item, "Pipeline failed and retry is unlikely to help: {}", error);
    }
}

struct Discovered {
    inputs: Vec<String>,
    references: Vec<crate::docs::Reference>,
}
