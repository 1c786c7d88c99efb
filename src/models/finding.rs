use serde::{Deserialize, Serialize};

use super::enums::{FindingSource, Severity};

/// One taxonomy violation or signal, as persisted for a job.
///
/// `start_offset`/`end_offset` are global char offsets into the script;
/// `start_line`/`end_line` are relative to the chunk the finding came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub job_id: String,
    pub script_id: String,
    pub version_id: String,
    pub source: FindingSource,
    pub article_id: u32,
    pub atom_id: Option<String>,
    pub severity: Severity,
    pub confidence: f32,
    pub title: String,
    pub description: String,
    pub evidence_snippet: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub location: serde_json::Value,
    pub is_interpretive: bool,
    pub evidence_hash: String,
}

impl Finding {
    pub fn span_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }
}

/// An AI finding after judging and guarding, before it is bound to a job row.
///
/// This is what the run cache stores: offsets are global for the chunk
/// position the run was computed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftFinding {
    pub article_id: u32,
    pub atom_id: Option<String>,
    pub severity: Severity,
    pub confidence: f32,
    pub title: String,
    pub description: String,
    pub evidence_snippet: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub is_interpretive: bool,
}

impl DraftFinding {
    pub fn span_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    /// Shift global offsets to a different chunk position.
    pub fn rebased(mut self, from_base: usize, to_base: usize) -> Self {
        if from_base != to_base {
            self.start_offset = self.start_offset - from_base.min(self.start_offset) + to_base;
            self.end_offset = self.end_offset - from_base.min(self.end_offset) + to_base;
        }
        self
    }
}

/// Cached outcome of routing and judging one chunk text under one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRun {
    pub run_key: String,
    pub job_id: String,
    pub chunk_id: String,
    /// Chunk start offset the cached findings' global offsets are relative to.
    pub offset_base: usize,
    pub findings: Vec<DraftFinding>,
    pub router_candidates: Vec<u32>,
    /// Judge calls that produced nothing usable (exhausted repair or unavailable).
    pub judge_failures: u32,
}
