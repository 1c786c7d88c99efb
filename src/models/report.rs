use serde::{Deserialize, Serialize};

use super::enums::Severity;
use super::finding::Finding;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.low + self.medium + self.high + self.critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistStatus {
    Ok,
    Warning,
    Fail,
}

impl ChecklistStatus {
    /// `fail` on any high/critical, `warning` on any low/medium, else `ok`.
    pub fn from_counts(counts: &SeverityCounts) -> Self {
        if counts.high + counts.critical > 0 {
            Self::Fail
        } else if counts.low + counts.medium > 0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }
}

/// Per-article slice of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub article_id: u32,
    pub title: String,
    pub counts: SeverityCounts,
    pub status: ChecklistStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_findings: Vec<Finding>,
}

/// Structured aggregate persisted as the report's `summary` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub job_id: String,
    pub script_id: String,
    pub version_id: String,
    pub taxonomy_version: String,
    pub findings_count: u32,
    pub totals: SeverityCounts,
    /// Every scannable article, in taxonomy order.
    pub checklist: Vec<ArticleSummary>,
    /// Articles that have findings, ascending by article id.
    pub findings_by_article: Vec<ArticleSummary>,
    pub failed_chunks: u32,
    /// Chunks where at least one judge call produced nothing usable.
    pub degraded_chunks: u32,
    pub generated_at: String,
}

/// One report row per job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: String,
    pub job_id: String,
    pub script_id: String,
    pub version_id: String,
    pub summary: ReportSummary,
    pub report_markdown: String,
    pub created_at: String,
}
