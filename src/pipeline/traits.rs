//! Store boundaries for the analysis pipeline.
//!
//! The shared relational store is the only coordination point between
//! worker processes. Each concern is a separate trait so pipeline logic
//! depends on the narrowest surface it needs:
//! - WorkQueue: lease / complete / fail of chunks
//! - JobStore: job lifecycle and progress accounting
//! - FindingStore: idempotent finding persistence
//! - RunCache: content-addressed chunk run reuse
//! - ReportStore: one aggregate report per job
//! - TermSource: active lexicon terms

use std::time::Duration;

use crate::db::DatabaseError;
use crate::models::{Chunk, ChunkRun, Finding, Job, JobReport};

use super::lexicon::LexiconTerm;

/// Chunk queue over the shared store.
pub trait WorkQueue {
    /// Oldest queued/running job that still has a pending chunk.
    fn next_job(&self) -> Result<Option<Job>, DatabaseError>;

    /// Earliest pending chunk of a job, by chunk_index.
    fn next_pending_chunk(&self, job_id: &str) -> Result<Option<Chunk>, DatabaseError>;

    /// Conditionally move a chunk from pending to judging.
    /// `None` means another worker won the race.
    fn lease_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, DatabaseError>;

    /// judging → done, only under the lease `chunk` was returned with.
    /// Returns false when the lease was reclaimed and possibly re-granted.
    fn complete_chunk(&self, chunk: &Chunk, degraded: bool) -> Result<bool, DatabaseError>;

    /// judging → failed, under the same lease rule as `complete_chunk`.
    fn fail_chunk(&self, chunk: &Chunk, error: &str) -> Result<bool, DatabaseError>;

    /// Return chunks stuck in judging longer than `older_than` to pending.
    fn reclaim_stale_chunks(&self, older_than: Duration) -> Result<usize, DatabaseError>;
}

/// Settled-chunk counts used in the report summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcomeCounts {
    pub failed: u32,
    pub degraded: u32,
}

pub trait JobStore {
    fn load_job(&self, job_id: &str) -> Result<Option<Job>, DatabaseError>;

    /// queued → running. Returns true only for the call that made the transition.
    fn mark_job_running(&self, job_id: &str) -> Result<bool, DatabaseError>;

    fn increment_job_progress(&self, job_id: &str) -> Result<(), DatabaseError>;

    /// Any chunk still pending or judging.
    fn job_has_active_chunks(&self, job_id: &str) -> Result<bool, DatabaseError>;

    /// Canonical normalized full text for the job, if one was stored.
    fn canonical_text(&self, job_id: &str) -> Result<Option<String>, DatabaseError>;

    fn chunk_outcome_counts(&self, job_id: &str) -> Result<ChunkOutcomeCounts, DatabaseError>;

    /// Running jobs with no pending or judging chunk left.
    fn settled_running_jobs(&self) -> Result<Vec<String>, DatabaseError>;

    /// Set completed + completed_at and pin progress to 100%. Returns true
    /// only for the call that made the transition.
    fn mark_job_completed(&self, job_id: &str) -> Result<bool, DatabaseError>;
}

pub trait FindingStore {
    /// Insert unless a finding with the same (job, evidence_hash) exists.
    /// Returns true when a row was written.
    fn upsert_finding(&self, finding: &Finding) -> Result<bool, DatabaseError>;

    fn job_findings(&self, job_id: &str) -> Result<Vec<Finding>, DatabaseError>;
}

pub trait RunCache {
    fn get_run(&self, run_key: &str) -> Result<Option<ChunkRun>, DatabaseError>;

    /// First writer wins; later writes for the same key are ignored.
    fn put_run(&self, run: &ChunkRun) -> Result<(), DatabaseError>;
}

pub trait ReportStore {
    fn report_exists(&self, job_id: &str) -> Result<bool, DatabaseError>;

    /// Insert or replace the report keyed by job id.
    fn upsert_report(&self, report: &JobReport) -> Result<(), DatabaseError>;
}

pub trait TermSource {
    fn load_active_terms(&self) -> Result<Vec<LexiconTerm>, DatabaseError>;
}

/// Everything the chunk pipeline and aggregation touch.
pub trait AnalysisStore: WorkQueue + JobStore + FindingStore + RunCache + ReportStore {}

impl<T> AnalysisStore for T where T: WorkQueue + JobStore + FindingStore + RunCache + ReportStore {}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify traits are object-safe (can be used as `dyn Trait`)
    #[test]
    fn traits_are_object_safe() {
        fn _assert_queue(_: &dyn WorkQueue) {}
        fn _assert_jobs(_: &dyn JobStore) {}
        fn _assert_findings(_: &dyn FindingStore) {}
        fn _assert_cache(_: &dyn RunCache) {}
        fn _assert_reports(_: &dyn ReportStore) {}
        fn _assert_terms(_: &dyn TermSource) {}
        fn _assert_store(_: &dyn AnalysisStore) {}
    }

    #[test]
    fn sqlite_store_is_an_analysis_store() {
        fn _assert<T: AnalysisStore>() {}
        _assert::<crate::db::SqliteStore>();
    }
}
