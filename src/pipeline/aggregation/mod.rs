//! Job aggregation: settled findings in, one report row out.
//!
//! Runs after every chunk outcome and is gated on the job having no
//! pending or judging chunk. A report that already exists short-circuits
//! to marking the job completed, so racing triggers converge.

pub mod render;

use std::cmp::Ordering;

use uuid::Uuid;

use crate::audit::{self, AuditSink, ANALYSIS_COMPLETED, RESULT_DEGRADED, RESULT_SUCCESS};
use crate::db::now_timestamp;
use crate::models::{
    ArticleSummary, ChecklistStatus, Finding, Job, JobReport, ReportSummary, SeverityCounts,
};
use crate::pipeline::chunk::dedup::dedupe_by_key;
use crate::pipeline::error::PipelineError;
use crate::pipeline::hashing::sha256_hex;
use crate::pipeline::traits::{AnalysisStore, ChunkOutcomeCounts};
use crate::taxonomy::{atom_number, Taxonomy};

pub use render::render_markdown;

/// Findings listed per article in the summary.
pub const TOP_FINDINGS_PER_ARTICLE: usize = 10;

/// Audit target type for job lifecycle events.
pub const JOB_TARGET: &str = "analysis_job";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Chunks still pending or judging.
    NotReady,
    /// A report already existed; the job was (re)marked completed.
    AlreadyReported,
    Reported { findings: u32 },
}

/// Aggregate `job_id` if all its chunks have settled.
pub fn aggregate_job(
    store: &dyn AnalysisStore,
    audit_sink: &dyn AuditSink,
    taxonomy: &Taxonomy,
    job_id: &str,
) -> Result<AggregationOutcome, PipelineError> {
    if store.job_has_active_chunks(job_id)? {
        return Ok(AggregationOutcome::NotReady);
    }
    if store.report_exists(job_id)? {
        // The report writer may have died before completing the job.
        let label = store.load_job(job_id)?.map(|job| job.script_id);
        let counts = store.chunk_outcome_counts(job_id)?;
        complete_job(store, audit_sink, job_id, label.as_deref(), counts)?;
        tracing::debug!(job_id, "Report already exists, job marked completed");
        return Ok(AggregationOutcome::AlreadyReported);
    }

    let job = store
        .load_job(job_id)?
        .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

    let findings = store.job_findings(job_id)?;
    let counts = store.chunk_outcome_counts(job_id)?;
    let mut summary = summarize(&job, taxonomy, findings);
    summary.failed_chunks = counts.failed;
    summary.degraded_chunks = counts.degraded;

    let report = JobReport {
        id: Uuid::new_v4().to_string(),
        job_id: job.id.clone(),
        script_id: job.script_id.clone(),
        version_id: job.version_id.clone(),
        report_markdown: render_markdown(&summary),
        created_at: summary.generated_at.clone(),
        summary,
    };
    store.upsert_report(&report)?;
    store.increment_job_progress(job_id)?;
    complete_job(store, audit_sink, job_id, Some(&job.script_id), counts)?;

    let findings_count = report.summary.findings_count;
    tracing::info!(
        job_id,
        findings = findings_count,
        failed_chunks = report.summary.failed_chunks,
        degraded_chunks = report.summary.degraded_chunks,
        "Report persisted, job completed"
    );
    Ok(AggregationOutcome::Reported {
        findings: findings_count,
    })
}

/// Mark the job completed and audit it. Racing aggregators can both get
/// here; only the one whose update flips the status emits the event.
fn complete_job(
    store: &dyn AnalysisStore,
    audit_sink: &dyn AuditSink,
    job_id: &str,
    script_id: Option<&str>,
    counts: ChunkOutcomeCounts,
) -> Result<(), PipelineError> {
    if !store.mark_job_completed(job_id)? {
        return Ok(());
    }
    let status = if counts.failed > 0 || counts.degraded > 0 {
        RESULT_DEGRADED
    } else {
        RESULT_SUCCESS
    };
    audit::log(audit_sink, ANALYSIS_COMPLETED, JOB_TARGET, job_id, script_id, status);
    Ok(())
}

/// Cross-chunk identity: overlapping chunks or windows can yield the same
/// finding under different evidence hashes.
fn global_key(f: &Finding) -> (String, u32, Option<String>, usize, usize, String) {
    (
        f.source.as_str().to_string(),
        f.article_id,
        f.atom_id.clone(),
        f.start_offset,
        f.end_offset,
        sha256_hex(&f.evidence_snippet),
    )
}

fn top_finding_order(a: &Finding, b: &Finding) -> Ordering {
    let atom = |f: &Finding| f.atom_id.as_deref().and_then(atom_number).unwrap_or(u32::MAX);
    atom(a)
        .cmp(&atom(b))
        .then_with(|| a.start_offset.cmp(&b.start_offset))
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
}

/// Build the structured summary. Failed/degraded chunk counts are left at
/// zero for the caller to fill.
pub fn summarize(job: &Job, taxonomy: &Taxonomy, findings: Vec<Finding>) -> ReportSummary {
    let in_scope: Vec<Finding> = findings
        .into_iter()
        .filter(|f| !taxonomy.is_out_of_scope(f.article_id))
        .collect();
    let findings = dedupe_by_key(in_scope, global_key);

    let mut totals = SeverityCounts::default();
    for f in &findings {
        totals.add(f.severity);
    }

    let mut article_ids: Vec<u32> = findings.iter().map(|f| f.article_id).collect();
    article_ids.sort_unstable();
    article_ids.dedup();

    let findings_by_article = article_ids
        .into_iter()
        .map(|article_id| {
            let mut own: Vec<Finding> = findings
                .iter()
                .filter(|f| f.article_id == article_id)
                .cloned()
                .collect();
            let mut counts = SeverityCounts::default();
            for f in &own {
                counts.add(f.severity);
            }
            own.sort_by(top_finding_order);
            own.truncate(TOP_FINDINGS_PER_ARTICLE);
            ArticleSummary {
                article_id,
                title: taxonomy
                    .article(article_id)
                    .map(|a| a.title.clone())
                    .unwrap_or_else(|| format!("Article {article_id}")),
                counts,
                status: ChecklistStatus::from_counts(&counts),
                top_findings: own,
            }
        })
        .collect::<Vec<_>>();

    let checklist = taxonomy
        .articles()
        .iter()
        .filter(|a| a.is_scannable())
        .map(|article| {
            let counts = findings_by_article
                .iter()
                .find(|s| s.article_id == article.id)
                .map(|s| s.counts)
                .unwrap_or_default();
            ArticleSummary {
                article_id: article.id,
                title: article.title.clone(),
                counts,
                status: ChecklistStatus::from_counts(&counts),
                top_findings: Vec::new(),
            }
        })
        .collect();

    ReportSummary {
        job_id: job.id.clone(),
        script_id: job.script_id.clone(),
        version_id: job.version_id.clone(),
        taxonomy_version: taxonomy.version().to_string(),
        findings_count: totals.total(),
        totals,
        checklist,
        findings_by_article,
        failed_chunks: 0,
        degraded_chunks: 0,
        generated_at: now_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingSink;
    use crate::db::SqliteStore;
    use crate::models::{FindingSource, JobStatus, Severity};
    use crate::pipeline::jobs::fixtures::{seed_chunk, seed_job};
    use crate::pipeline::traits::{FindingStore, JobStore, WorkQueue};
    use rusqlite::params;

    fn finding(id: &str, article_id: u32, severity: Severity, start: usize) -> Finding {
        Finding {
            id: id.into(),
            job_id: "j".into(),
            script_id: "script-1".into(),
            version_id: "version-1".into(),
            source: FindingSource::Ai,
            article_id,
            atom_id: None,
            severity,
            confidence: 0.8,
            title: "t".into(),
            description: String::new(),
            evidence_snippet: "snippet".into(),
            start_offset: start,
            end_offset: start + 7,
            start_line: 1,
            end_line: 1,
            location: serde_json::json!({}),
            is_interpretive: false,
            evidence_hash: format!("hash-{id}"),
        }
    }

    /// A running job whose single chunk is done.
    fn settled_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let chunk = seed_chunk(store.conn(), "j", 0, "text", 0);
        store.mark_job_running("j").unwrap();
        let leased = store.lease_chunk(&chunk).unwrap().unwrap();
        store.complete_chunk(&leased, false).unwrap();
        store.increment_job_progress("j").unwrap();
        store
    }

    fn report_rows(store: &SqliteStore) -> i64 {
        store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM analysis_reports WHERE job_id = ?1",
                params!["j"],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn job() -> Job {
        Job {
            id: "j".into(),
            script_id: "script-1".into(),
            version_id: "version-1".into(),
            status: JobStatus::Running,
            progress_total: 2,
            progress_done: 1,
            progress_percent: 50,
            config_snapshot: serde_json::Value::Null,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn findings_by_article_is_ascending() {
        let taxonomy = Taxonomy::bundled().unwrap();
        let summary = summarize(
            &job(),
            &taxonomy,
            vec![
                finding("a", 8, Severity::Low, 0),
                finding("b", 5, Severity::Medium, 20),
            ],
        );
        let ids: Vec<u32> = summary.findings_by_article.iter().map(|a| a.article_id).collect();
        assert_eq!(ids, vec![5, 8]);
    }

    #[test]
    fn duplicate_keeps_highest_severity() {
        let taxonomy = Taxonomy::bundled().unwrap();
        let summary = summarize(
            &job(),
            &taxonomy,
            vec![
                finding("a", 5, Severity::Low, 0),
                finding("b", 5, Severity::High, 0),
            ],
        );
        assert_eq!(summary.findings_count, 1);
        assert_eq!(summary.totals.high, 1);
        assert_eq!(summary.findings_by_article[0].top_findings[0].severity, Severity::High);
    }

    #[test]
    fn out_of_scope_article_is_excluded() {
        let taxonomy = Taxonomy::bundled().unwrap();
        let summary = summarize(
            &job(),
            &taxonomy,
            vec![
                finding("a", 26, Severity::Critical, 0),
                finding("b", 5, Severity::Low, 30),
            ],
        );
        assert_eq!(summary.findings_count, 1);
        assert!(summary.findings_by_article.iter().all(|a| a.article_id != 26));
        assert!(summary.checklist.iter().all(|a| a.article_id != 26 && a.article_id != 1));
    }

    #[test]
    fn checklist_marks_fail_and_warning() {
        let taxonomy = Taxonomy::bundled().unwrap();
        let summary = summarize(
            &job(),
            &taxonomy,
            vec![
                finding("a", 5, Severity::Critical, 0),
                finding("b", 7, Severity::Low, 30),
            ],
        );
        let status = |id: u32| summary.checklist.iter().find(|a| a.article_id == id).unwrap().status;
        assert_eq!(status(5), ChecklistStatus::Fail);
        assert_eq!(status(7), ChecklistStatus::Warning);
        assert_eq!(status(9), ChecklistStatus::Ok);
    }

    #[test]
    fn top_findings_order_and_cap() {
        let taxonomy = Taxonomy::bundled().unwrap();
        let mut findings: Vec<Finding> = (0..12)
            .map(|i| finding(&format!("f{i}"), 5, Severity::Low, 100 - i * 5))
            .collect();
        let mut atom_two = finding("atom2", 5, Severity::Low, 500);
        atom_two.atom_id = Some("5-2".into());
        let mut atom_one = finding("atom1", 5, Severity::Low, 900);
        atom_one.atom_id = Some("5-1".into());
        findings.push(atom_two);
        findings.push(atom_one);

        let summary = summarize(&job(), &taxonomy, findings);
        let top = &summary.findings_by_article[0].top_findings;
        assert_eq!(top.len(), TOP_FINDINGS_PER_ARTICLE);
        assert_eq!(top[0].atom_id.as_deref(), Some("5-1"));
        assert_eq!(top[1].atom_id.as_deref(), Some("5-2"));
        assert!(top[2].start_offset < top[3].start_offset);
        assert_eq!(summary.findings_by_article[0].counts.total(), 14);
    }

    #[test]
    fn aggregation_waits_for_active_chunks() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        seed_chunk(store.conn(), "j", 0, "text", 0);
        let sink = RecordingSink::default();
        let outcome = aggregate_job(&store, &sink, &Taxonomy::bundled().unwrap(), "j").unwrap();
        assert_eq!(outcome, AggregationOutcome::NotReady);
        assert_eq!(report_rows(&store), 0);
        assert!(sink.events.borrow().is_empty());
    }

    #[test]
    fn aggregation_persists_report_and_completes_job() {
        let store = settled_store();
        store.upsert_finding(&finding("a", 5, Severity::High, 0)).unwrap();
        let sink = RecordingSink::default();
        let taxonomy = Taxonomy::bundled().unwrap();

        let outcome = aggregate_job(&store, &sink, &taxonomy, "j").unwrap();
        assert_eq!(outcome, AggregationOutcome::Reported { findings: 1 });

        let job = store.load_job("j").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.completed_at.is_some());
        assert_eq!(sink.events.borrow()[0].event_type, ANALYSIS_COMPLETED);
    }

    #[test]
    fn re_aggregation_is_idempotent() {
        let store = settled_store();
        let sink = RecordingSink::default();
        let taxonomy = Taxonomy::bundled().unwrap();

        aggregate_job(&store, &sink, &taxonomy, "j").unwrap();
        let second = aggregate_job(&store, &sink, &taxonomy, "j").unwrap();

        assert_eq!(second, AggregationOutcome::AlreadyReported);
        assert_eq!(report_rows(&store), 1);
        assert_eq!(store.load_job("j").unwrap().unwrap().status, JobStatus::Completed);
        assert_eq!(sink.events.borrow().len(), 1);
    }

    #[test]
    fn completion_is_audited_only_by_the_transitioning_worker() {
        let store = settled_store();
        let sink = RecordingSink::default();
        // Another worker passed the gate at the same time and completed first.
        assert!(store.mark_job_completed("j").unwrap());

        let outcome = aggregate_job(&store, &sink, &Taxonomy::bundled().unwrap(), "j").unwrap();
        assert!(matches!(outcome, AggregationOutcome::Reported { .. }));
        assert_eq!(report_rows(&store), 1);
        assert!(sink.events.borrow().is_empty());
    }

    #[test]
    fn orphaned_report_completes_job_with_one_event() {
        let store = settled_store();
        let sink = RecordingSink::default();
        let taxonomy = Taxonomy::bundled().unwrap();
        aggregate_job(&store, &RecordingSink::default(), &taxonomy, "j").unwrap();
        // Report written, then the writer died before completing the job.
        store
            .conn()
            .execute("UPDATE analysis_jobs SET status = 'running' WHERE id = 'j'", [])
            .unwrap();

        assert_eq!(
            aggregate_job(&store, &sink, &taxonomy, "j").unwrap(),
            AggregationOutcome::AlreadyReported
        );
        aggregate_job(&store, &sink, &taxonomy, "j").unwrap();

        let events = sink.events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target_label.as_deref(), Some("script-1"));
        assert_eq!(events[0].result_status, RESULT_SUCCESS);
    }

    #[test]
    fn failed_chunk_completes_as_degraded() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_job(store.conn(), "j", 1, "2026-01-01T00:00:00.000Z");
        let chunk = seed_chunk(store.conn(), "j", 0, "text", 0);
        let leased = store.lease_chunk(&chunk).unwrap().unwrap();
        store.fail_chunk(&leased, "boom").unwrap();
        let sink = RecordingSink::default();

        aggregate_job(&store, &sink, &Taxonomy::bundled().unwrap(), "j").unwrap();
        assert_eq!(sink.events.borrow()[0].result_status, RESULT_DEGRADED);
    }

    #[test]
    fn audit_failure_does_not_block_completion() {
        let store = settled_store();
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let outcome = aggregate_job(&store, &sink, &Taxonomy::bundled().unwrap(), "j").unwrap();
        assert!(matches!(outcome, AggregationOutcome::Reported { .. }));
    }
}
