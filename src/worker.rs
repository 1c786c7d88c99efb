//! Poll loop: fetch → claim → process → aggregate → sleep.
//!
//! Several worker processes may run this loop against one database. The
//! conditional chunk lease is the only mutual exclusion; everything else
//! is idempotent or a narrow conditional write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::audit::{self, AuditSink, ANALYSIS_STARTED, RESULT_SUCCESS};
use crate::models::{Chunk, Job};
use crate::pipeline::aggregation::{aggregate_job, AggregationOutcome, JOB_TARGET};
use crate::pipeline::chunk::{ChunkPipeline, PipelineOptions};
use crate::pipeline::lexicon::refresher::sleep_unless_shutdown;
use crate::pipeline::lexicon::LexiconMatcher;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::traits::AnalysisStore;
use crate::pipeline::PipelineError;
use crate::taxonomy::Taxonomy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STALE_CLAIM: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    /// Judging chunks older than this are returned to pending.
    pub stale_claim_after: Duration,
    pub options: PipelineOptions,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_claim_after: DEFAULT_STALE_CLAIM,
            options: PipelineOptions::default(),
        }
    }
}

/// Result of one poll round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A chunk was leased and settled.
    Processed { job_id: String, chunk_id: String },
    /// Another worker won the lease race.
    LostRace,
    Idle,
}

pub struct Worker<'a> {
    store: &'a dyn AnalysisStore,
    audit: &'a dyn AuditSink,
    llm: &'a dyn LlmClient,
    taxonomy: &'a Taxonomy,
    lexicon: &'a LexiconMatcher,
    settings: WorkerSettings,
}

impl<'a> Worker<'a> {
    pub fn new(
        store: &'a dyn AnalysisStore,
        audit: &'a dyn AuditSink,
        llm: &'a dyn LlmClient,
        taxonomy: &'a Taxonomy,
        lexicon: &'a LexiconMatcher,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            audit,
            llm,
            taxonomy,
            lexicon,
            settings,
        }
    }

    fn pipeline(&self) -> ChunkPipeline<'_> {
        ChunkPipeline::new(
            self.store,
            self.llm,
            self.taxonomy,
            self.lexicon,
            self.settings.options,
        )
    }

    /// Lease `chunk_id` and settle it. Returns `None` if the lease was lost.
    fn claim_and_process(&self, job: &Job, chunk_id: &str) -> Result<Option<Chunk>, PipelineError> {
        let Some(chunk) = self.store.lease_chunk(chunk_id)? else {
            tracing::debug!(chunk_id, "Chunk already claimed by another worker");
            return Ok(None);
        };

        if self.store.mark_job_running(&job.id)? {
            tracing::info!(job_id = %job.id, script_id = %job.script_id, "Analysis started");
            audit::log(
                self.audit,
                ANALYSIS_STARTED,
                JOB_TARGET,
                &job.id,
                Some(&job.script_id),
                RESULT_SUCCESS,
            );
        }

        if let Err(e) = self.pipeline().process(job, &chunk) {
            tracing::warn!(
                job_id = %job.id,
                chunk_id = %chunk.id,
                error = %e,
                "Chunk failed"
            );
            if self.store.fail_chunk(&chunk, &e.to_string())? {
                self.store.increment_job_progress(&job.id)?;
            }
        }

        aggregate_job(self.store, self.audit, self.taxonomy, &job.id)?;
        Ok(Some(chunk))
    }

    /// Drain one job's pending chunks in index order, then aggregate.
    ///
    /// Chunks claimed by other processes are left to them; the final
    /// aggregation is then `NotReady` and whichever worker settles the
    /// last chunk writes the report.
    pub fn run_once(&self, job_id: &str) -> Result<AggregationOutcome, PipelineError> {
        let job = self
            .store
            .load_job(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        while let Some(next) = self.store.next_pending_chunk(job_id)? {
            self.claim_and_process(&job, &next.id)?;
        }

        aggregate_job(self.store, self.audit, self.taxonomy, job_id)
    }

    /// One poll round across all jobs.
    pub fn tick(&self) -> Result<Tick, PipelineError> {
        self.store.reclaim_stale_chunks(self.settings.stale_claim_after)?;

        if let Some(job) = self.store.next_job()? {
            if let Some(next) = self.store.next_pending_chunk(&job.id)? {
                return Ok(match self.claim_and_process(&job, &next.id)? {
                    Some(chunk) => Tick::Processed {
                        job_id: job.id,
                        chunk_id: chunk.id,
                    },
                    None => Tick::LostRace,
                });
            }
        }

        // Nothing claimable: finish jobs whose last worker died before aggregating.
        for job_id in self.store.settled_running_jobs()? {
            tracing::info!(job_id = %job_id, "Aggregating settled job");
            aggregate_job(self.store, self.audit, self.taxonomy, &job_id)?;
        }
        Ok(Tick::Idle)
    }

    /// Poll until `shutdown` is set. Store errors are logged and retried
    /// after the poll interval.
    pub fn run_forever(&self, shutdown: &AtomicBool) {
        tracing::info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            high_recall = self.settings.options.high_recall,
            deterministic = self.settings.options.deterministic,
            "Worker polling"
        );
        while !shutdown.load(Ordering::Relaxed) {
            match self.tick() {
                Ok(Tick::Processed { .. }) | Ok(Tick::LostRace) => continue,
                Ok(Tick::Idle) => {}
                Err(e) => tracing::error!(error = %e, "Poll round failed"),
            }
            if !sleep_unless_shutdown(self.settings.poll_interval, shutdown) {
                break;
            }
        }
        tracing::info!("Worker stopped");
    }
}
