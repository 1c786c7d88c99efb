//! SQLite persistence for findings, chunk runs, and reports.
//!
//! All writes are idempotent: findings and runs use INSERT OR IGNORE on
//! their identity keys, reports upsert on job id.

use rusqlite::{params, OptionalExtension, Row};

use super::traits::{FindingStore, ReportStore, RunCache};
use crate::db::{now_timestamp, DatabaseError, SqliteStore};
use crate::models::{ChunkRun, Finding, FindingSource, JobReport, Severity};

struct FindingRow {
    id: String,
    job_id: String,
    script_id: String,
    version_id: String,
    source: String,
    article_id: i64,
    atom_id: Option<String>,
    severity: String,
    confidence: f64,
    title: String,
    description: String,
    evidence_snippet: String,
    start_offset: i64,
    end_offset: i64,
    start_line: i64,
    end_line: i64,
    location: String,
    is_interpretive: bool,
    evidence_hash: String,
}

impl FindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            script_id: row.get(2)?,
            version_id: row.get(3)?,
            source: row.get(4)?,
            article_id: row.get(5)?,
            atom_id: row.get(6)?,
            severity: row.get(7)?,
            confidence: row.get(8)?,
            title: row.get(9)?,
            description: row.get(10)?,
            evidence_snippet: row.get(11)?,
            start_offset: row.get(12)?,
            end_offset: row.get(13)?,
            start_line: row.get(14)?,
            end_line: row.get(15)?,
            location: row.get(16)?,
            is_interpretive: row.get(17)?,
            evidence_hash: row.get(18)?,
        })
    }

    fn into_finding(self) -> Result<Finding, DatabaseError> {
        Ok(Finding {
            id: self.id,
            job_id: self.job_id,
            script_id: self.script_id,
            version_id: self.version_id,
            source: self.source.parse::<FindingSource>()?,
            article_id: self.article_id.max(0) as u32,
            atom_id: self.atom_id,
            severity: self.severity.parse::<Severity>()?,
            confidence: self.confidence as f32,
            title: self.title,
            description: self.description,
            evidence_snippet: self.evidence_snippet,
            start_offset: self.start_offset.max(0) as usize,
            end_offset: self.end_offset.max(0) as usize,
            start_line: self.start_line.max(0) as usize,
            end_line: self.end_line.max(0) as usize,
            location: serde_json::from_str(&self.location)
                .map_err(|e| DatabaseError::json("analysis_findings.location", e))?,
            is_interpretive: self.is_interpretive,
            evidence_hash: self.evidence_hash,
        })
    }
}

impl FindingStore for SqliteStore {
    fn upsert_finding(&self, finding: &Finding) -> Result<bool, DatabaseError> {
        let location = serde_json::to_string(&finding.location)
            .map_err(|e| DatabaseError::json("analysis_findings.location", e))?;
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO analysis_findings
             (id, job_id, script_id, version_id, source, article_id, atom_id, severity,
              confidence, title, description, evidence_snippet, start_offset_global,
              end_offset_global, start_line_chunk, end_line_chunk, location,
              is_interpretive, evidence_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                finding.id,
                finding.job_id,
                finding.script_id,
                finding.version_id,
                finding.source.as_str(),
                finding.article_id,
                finding.atom_id,
                finding.severity.as_str(),
                finding.confidence as f64,
                finding.title,
                finding.description,
                finding.evidence_snippet,
                finding.start_offset as i64,
                finding.end_offset as i64,
                finding.start_line as i64,
                finding.end_line as i64,
                location,
                finding.is_interpretive,
                finding.evidence_hash,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn job_findings(&self, job_id: &str) -> Result<Vec<Finding>, DatabaseError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, job_id, script_id, version_id, source, article_id, atom_id, severity,
                    confidence, title, description, evidence_snippet, start_offset_global,
                    end_offset_global, start_line_chunk, end_line_chunk, location,
                    is_interpretive, evidence_hash
             FROM analysis_findings
             WHERE job_id = ?1
             ORDER BY start_offset_global ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], FindingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(FindingRow::into_finding).collect()
    }
}

impl RunCache for SqliteStore {
    fn get_run(&self, run_key: &str) -> Result<Option<ChunkRun>, DatabaseError> {
        let row = self
            .conn()
            .query_row(
                "SELECT run_key, job_id, chunk_id, offset_base, findings, router_candidates, judge_failures
                 FROM analysis_chunk_runs WHERE run_key = ?1",
                params![run_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((run_key, job_id, chunk_id, offset_base, findings, candidates, failures)) = row
        else {
            return Ok(None);
        };

        Ok(Some(ChunkRun {
            run_key,
            job_id,
            chunk_id,
            offset_base: offset_base.max(0) as usize,
            findings: serde_json::from_str(&findings)
                .map_err(|e| DatabaseError::json("analysis_chunk_runs.findings", e))?,
            router_candidates: serde_json::from_str(&candidates)
                .map_err(|e| DatabaseError::json("analysis_chunk_runs.router_candidates", e))?,
            judge_failures: failures.max(0) as u32,
        }))
    }

    fn put_run(&self, run: &ChunkRun) -> Result<(), DatabaseError> {
        let findings = serde_json::to_string(&run.findings)
            .map_err(|e| DatabaseError::json("analysis_chunk_runs.findings", e))?;
        let candidates = serde_json::to_string(&run.router_candidates)
            .map_err(|e| DatabaseError::json("analysis_chunk_runs.router_candidates", e))?;
        self.conn().execute(
            "INSERT OR IGNORE INTO analysis_chunk_runs
             (run_key, job_id, chunk_id, offset_base, findings, router_candidates, judge_failures, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_key,
                run.job_id,
                run.chunk_id,
                run.offset_base as i64,
                findings,
                candidates,
                run.judge_failures,
                now_timestamp(),
            ],
        )?;
        Ok(())
    }
}

impl ReportStore for SqliteStore {
    fn report_exists(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS (SELECT 1 FROM analysis_reports WHERE job_id = ?1)",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn upsert_report(&self, report: &JobReport) -> Result<(), DatabaseError> {
        let summary = serde_json::to_string(&report.summary)
            .map_err(|e| DatabaseError::json("analysis_reports.summary", e))?;
        let totals = &report.summary.totals;
        self.conn().execute(
            "INSERT INTO analysis_reports
             (id, job_id, script_id, version_id, findings_count, severity_low, severity_medium,
              severity_high, severity_critical, summary, report_markdown, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(job_id) DO UPDATE SET
                findings_count = excluded.findings_count,
                severity_low = excluded.severity_low,
                severity_medium = excluded.severity_medium,
                severity_high = excluded.severity_high,
                severity_critical = excluded.severity_critical,
                summary = excluded.summary,
                report_markdown = excluded.report_markdown,
                updated_at = ?13",
            params![
                report.id,
                report.job_id,
                report.script_id,
                report.version_id,
                report.summary.findings_count,
                totals.low,
                totals.medium,
                totals.high,
                totals.critical,
                summary,
                report.report_markdown,
                report.created_at,
                now_timestamp(),
            ],
        )?;
        Ok(())
    }
}
