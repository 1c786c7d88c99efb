//! Work claiming and job state over the shared SQLite store.
//!
//! The conditional claim in `lease_chunk` is the only cross-process
//! mutual-exclusion primitive. Every other write here is either
//! idempotent or narrowly conditional so racing workers stay harmless.

use std::time::Duration;

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::traits::{ChunkOutcomeCounts, JobStore, WorkQueue};
use crate::db::{now_timestamp, DatabaseError, SqliteStore};
use crate::models::{Chunk, ChunkStatus, Job, JobStatus};

const JOB_COLUMNS: &str = "id, script_id, version_id, status, progress_total, progress_done,
    progress_percent, config_snapshot, created_at, started_at, completed_at";

const CHUNK_COLUMNS: &str = "id, job_id, chunk_index, text, start_offset, end_offset,
    start_line, end_line, status, last_error, lease_token";

/// Raw job row before enum/JSON conversion.
struct JobRow {
    id: String,
    script_id: String,
    version_id: String,
    status: String,
    progress_total: i64,
    progress_done: i64,
    progress_percent: i64,
    config_snapshot: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            script_id: row.get(1)?,
            version_id: row.get(2)?,
            status: row.get(3)?,
            progress_total: row.get(4)?,
            progress_done: row.get(5)?,
            progress_percent: row.get(6)?,
            config_snapshot: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        // An unparseable snapshot is carried as a string so the job's chunks
        // fail config validation instead of stalling the queue here.
        let config_snapshot = match self.config_snapshot {
            None => serde_json::Value::Null,
            Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        };
        Ok(Job {
            id: self.id,
            script_id: self.script_id,
            version_id: self.version_id,
            status: self.status.parse::<JobStatus>()?,
            progress_total: self.progress_total,
            progress_done: self.progress_done,
            progress_percent: self.progress_percent,
            config_snapshot,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

struct ChunkRow {
    id: String,
    job_id: String,
    chunk_index: i64,
    text: String,
    start_offset: i64,
    end_offset: i64,
    start_line: i64,
    end_line: i64,
    status: String,
    last_error: Option<String>,
    lease_token: Option<String>,
}

impl ChunkRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            chunk_index: row.get(2)?,
            text: row.get(3)?,
            start_offset: row.get(4)?,
            end_offset: row.get(5)?,
            start_line: row.get(6)?,
            end_line: row.get(7)?,
            status: row.get(8)?,
            last_error: row.get(9)?,
            lease_token: row.get(10)?,
        })
    }

    fn into_chunk(self) -> Result<Chunk, DatabaseError> {
        Ok(Chunk {
            id: self.id,
            job_id: self.job_id,
            chunk_index: self.chunk_index,
            text: self.text,
            start_offset: self.start_offset.max(0) as usize,
            end_offset: self.end_offset.max(0) as usize,
            start_line: self.start_line.max(1) as usize,
            end_line: self.end_line.max(1) as usize,
            status: self.status.parse::<ChunkStatus>()?,
            last_error: self.last_error,
            lease_token: self.lease_token,
        })
    }
}

fn stale_cutoff(older_than: Duration) -> String {
    let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
    (chrono::Utc::now() - age).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl WorkQueue for SqliteStore {
    fn next_job(&self) -> Result<Option<Job>, DatabaseError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs j
             WHERE j.status IN ('queued', 'running')
               AND EXISTS (SELECT 1 FROM analysis_chunks c
                           WHERE c.job_id = j.id AND c.status = 'pending')
             ORDER BY j.created_at ASC, j.id ASC
             LIMIT 1"
        );
        let row = self
            .conn()
            .query_row(&sql, [], JobRow::from_row)
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    fn next_pending_chunk(&self, job_id: &str) -> Result<Option<Chunk>, DatabaseError> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM analysis_chunks
             WHERE job_id = ?1 AND status = 'pending'
             ORDER BY chunk_index ASC
             LIMIT 1"
        );
        let row = self
            .conn()
            .query_row(&sql, params![job_id], ChunkRow::from_row)
            .optional()?;
        row.map(ChunkRow::into_chunk).transpose()
    }

    fn lease_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, DatabaseError> {
        let sql = format!(
            "UPDATE analysis_chunks
             SET status = 'judging', claimed_at = ?2, lease_token = ?3, last_error = NULL
             WHERE id = ?1 AND status = 'pending'
             RETURNING {CHUNK_COLUMNS}"
        );
        let token = Uuid::new_v4().to_string();
        let row = self
            .conn()
            .query_row(&sql, params![chunk_id, now_timestamp(), token], ChunkRow::from_row)
            .optional()?;
        row.map(ChunkRow::into_chunk).transpose()
    }

    fn complete_chunk(&self, chunk: &Chunk, degraded: bool) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE analysis_chunks
             SET status = 'done', degraded = ?2, claimed_at = NULL, lease_token = NULL
             WHERE id = ?1 AND status = 'judging' AND lease_token = ?3",
            params![chunk.id, degraded, chunk.lease_token],
        )?;
        Ok(changed == 1)
    }

    fn fail_chunk(&self, chunk: &Chunk, error: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE analysis_chunks
             SET status = 'failed', last_error = ?2, claimed_at = NULL, lease_token = NULL
             WHERE id = ?1 AND status = 'judging' AND lease_token = ?3",
            params![chunk.id, error, chunk.lease_token],
        )?;
        Ok(changed == 1)
    }

    fn reclaim_stale_chunks(&self, older_than: Duration) -> Result<usize, DatabaseError> {
        let reclaimed = self.conn().execute(
            "UPDATE analysis_chunks
             SET status = 'pending', claimed_at = NULL, lease_token = NULL
             WHERE status = 'judging' AND claimed_at IS NOT NULL AND claimed_at < ?1",
            params![stale_cutoff(older_than)],
        )?;
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Returned stale judging chunks to pending");
        }
        Ok(reclaimed)
    }
}

impl JobStore for SqliteStore {
    fn load_job(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = ?1");
        let row = self
            .conn()
            .query_row(&sql, params![job_id], JobRow::from_row)
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    fn mark_job_running(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE analysis_jobs SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![job_id, now_timestamp()],
        )?;
        Ok(changed == 1)
    }

    fn increment_job_progress(&self, job_id: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "UPDATE analysis_jobs SET
                progress_done = MIN(progress_done + 1, progress_total),
                progress_percent = (100 * MIN(progress_done + 1, progress_total)) / MAX(1, progress_total)
             WHERE id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    fn job_has_active_chunks(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let active: bool = self.conn().query_row(
            "SELECT EXISTS (SELECT 1 FROM analysis_chunks
                            WHERE job_id = ?1 AND status IN ('pending', 'judging'))",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(active)
    }

    fn canonical_text(&self, job_id: &str) -> Result<Option<String>, DatabaseError> {
        let text = self
            .conn()
            .query_row(
                "SELECT content FROM job_canonical_texts WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    fn chunk_outcome_counts(&self, job_id: &str) -> Result<ChunkOutcomeCounts, DatabaseError> {
        let (failed, degraded): (Option<i64>, Option<i64>) = self.conn().query_row(
            "SELECT SUM(status = 'failed'), SUM(degraded != 0)
             FROM analysis_chunks WHERE job_id = ?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ChunkOutcomeCounts {
            failed: failed.unwrap_or(0) as u32,
            degraded: degraded.unwrap_or(0) as u32,
        })
    }

    fn settled_running_jobs(&self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self.conn().prepare(
            "SELECT j.id FROM analysis_jobs j
             WHERE j.status = 'running'
               AND NOT EXISTS (SELECT 1 FROM analysis_chunks c
                               WHERE c.job_id = j.id AND c.status IN ('pending', 'judging'))
             ORDER BY j.created_at ASC, j.id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn mark_job_completed(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE analysis_jobs SET
                status = 'completed',
                completed_at = COALESCE(completed_at, ?2),
                progress_done = progress_total,
                progress_percent = 100
             WHERE id = ?1 AND status != 'completed'",
            params![job_id, now_timestamp()],
        )?;
        Ok(changed == 1)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn next_job_prefers_oldest_with_pending_chunk() {
        let store = store();
        seed_job(store.conn(), "old-done", 1, "2026-01-01T00:00:00.000Z");
        let c = seed_chunk(store.conn(), "old-done", 0, "x", 0);
        store
            .conn()
            .execute("UPDATE analysis_chunks SET status = 'done' WHERE id = ?1", [&c])
            .unwrap();
        seed_job(store.conn(), "newer", 1, "2026-01-03T00:00:00.000Z");
        seed_chunk(store.conn(), "newer", 0, "x", 0);
        seed_job(store.conn(), "older", 1, "2026-01-02T00:00:00.000Z");
        seed_chunk(store.conn(), "older", 0, "x", 0);

        let job = store.next_job().unwrap().unwrap();
        assert_eq!(job.id, "older");
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn next_pending_chunk_is_lowest_index() {
        let store = store();
        seed_job(store.conn(), "j", 3, "2026-01-01T00:00:00.000Z");
        seed_chunk(store.conn(), "j", 2, "c", 20);
        seed_chunk(store.conn(), "j", 0, "a", 0);
        seed_chunk(store.conn(), "j", 1, "b", 10);

        let chunk = store.next_pending_chunk("j").unwrap().unwrap();
        assert_eq!(chunk.chunk_index, 0);
    }

    #[test]
    fn lease_is_exclusive() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let id = seed_chunk(store.conn(), "j", 0, "text", 0);

        let first = store.lease_chunk(&id).unwrap();
        let second = store.lease_chunk(&id).unwrap();
        assert_eq!(first.unwrap().status, ChunkStatus::Judging);
        assert!(second.is_none());
    }

    #[test]
    fn lease_is_exclusive_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteStore::open(&path).unwrap();
        let b = SqliteStore::open(&path).unwrap();
        seed_job(a.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let id = seed_chunk(a.conn(), "j", 0, "text", 0);

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|store| {
                let id = id.clone();
                std::thread::spawn(move || store.lease_chunk(&id).unwrap().is_some())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn mark_running_transitions_once() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        assert!(store.mark_job_running("j").unwrap());
        assert!(!store.mark_job_running("j").unwrap());
        let job = store.load_job("j").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn progress_floors_and_never_exceeds_total() {
        let store = store();
        seed_job(store.conn(), "j", 2, "2026-01-01T00:00:00.000Z"); // total = 3
        store.increment_job_progress("j").unwrap();
        let job = store.load_job("j").unwrap().unwrap();
        assert_eq!((job.progress_done, job.progress_percent), (1, 33));

        for _ in 0..5 {
            store.increment_job_progress("j").unwrap();
        }
        let job = store.load_job("j").unwrap().unwrap();
        assert_eq!((job.progress_done, job.progress_percent), (3, 100));
    }

    #[test]
    fn active_chunks_gate() {
        let store = store();
        seed_job(store.conn(), "j", 2, "2026-01-01T00:00:00.000Z");
        let a = seed_chunk(store.conn(), "j", 0, "a", 0);
        let b = seed_chunk(store.conn(), "j", 1, "b", 1);
        assert!(store.job_has_active_chunks("j").unwrap());

        let leased = store.lease_chunk(&a).unwrap().unwrap();
        assert!(store.complete_chunk(&leased, false).unwrap());
        assert!(store.job_has_active_chunks("j").unwrap());

        let leased = store.lease_chunk(&b).unwrap().unwrap();
        assert!(store.job_has_active_chunks("j").unwrap());
        assert!(store.fail_chunk(&leased, "boom").unwrap());
        assert!(!store.job_has_active_chunks("j").unwrap());

        let counts = store.chunk_outcome_counts("j").unwrap();
        assert_eq!(counts, ChunkOutcomeCounts { failed: 1, degraded: 0 });
    }

    #[test]
    fn stale_claims_return_to_pending() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let id = seed_chunk(store.conn(), "j", 0, "a", 0);
        store.lease_chunk(&id).unwrap();

        assert_eq!(store.reclaim_stale_chunks(Duration::from_secs(3600)).unwrap(), 0);

        store
            .conn()
            .execute(
                "UPDATE analysis_chunks SET claimed_at = '2000-01-01T00:00:00.000Z' WHERE id = ?1",
                [&id],
            )
            .unwrap();
        assert_eq!(store.reclaim_stale_chunks(Duration::from_secs(3600)).unwrap(), 1);
        assert_eq!(chunk_status(store.conn(), &id), "pending");
    }

    #[test]
    fn reclaimed_lease_cannot_settle_chunk() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let id = seed_chunk(store.conn(), "j", 0, "a", 0);
        let stale = store.lease_chunk(&id).unwrap().unwrap();
        store
            .conn()
            .execute(
                "UPDATE analysis_chunks SET claimed_at = '2000-01-01T00:00:00.000Z' WHERE id = ?1",
                [&id],
            )
            .unwrap();
        assert_eq!(store.reclaim_stale_chunks(Duration::from_secs(60)).unwrap(), 1);
        let current = store.lease_chunk(&id).unwrap().unwrap();
        assert_ne!(current.lease_token, stale.lease_token);

        assert!(!store.complete_chunk(&stale, false).unwrap());
        assert!(!store.fail_chunk(&stale, "late").unwrap());
        assert_eq!(chunk_status(store.conn(), &id), "judging");
        assert!(store.job_has_active_chunks("j").unwrap());

        assert!(store.complete_chunk(&current, false).unwrap());
        assert_eq!(chunk_status(store.conn(), &id), "done");
    }

    #[test]
    fn settled_running_jobs_listed() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let id = seed_chunk(store.conn(), "j", 0, "a", 0);
        store.mark_job_running("j").unwrap();
        assert!(store.settled_running_jobs().unwrap().is_empty());

        let leased = store.lease_chunk(&id).unwrap().unwrap();
        store.complete_chunk(&leased, true).unwrap();
        assert_eq!(store.settled_running_jobs().unwrap(), vec!["j".to_string()]);
        assert_eq!(store.chunk_outcome_counts("j").unwrap().degraded, 1);
    }

    #[test]
    fn malformed_snapshot_surfaces_as_config_error() {
        let store = store();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        store
            .conn()
            .execute("UPDATE analysis_jobs SET config_snapshot = 'not json' WHERE id = 'j'", [])
            .unwrap();
        let job = store.load_job("j").unwrap().unwrap();
        assert!(job.config().is_err());
    }

    #[test]
    fn completed_job_pins_progress() {
        let store = store();
        seed_job(store.conn(), "j", 4, "2026-01-01T00:00:00.000Z");
        assert!(store.mark_job_completed("j").unwrap());
        assert!(!store.mark_job_completed("j").unwrap());
        let job = store.load_job("j").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.progress_done, job.progress_total);
        assert!(job.completed_at.is_some());
    }
}
