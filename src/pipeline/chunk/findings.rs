//! Building persisted finding rows from lexicon matches and guarded AI drafts.

use serde_json::json;
use uuid::Uuid;

use crate::models::{Chunk, DraftFinding, Finding, FindingSource, Job, Severity};
use crate::pipeline::hashing::{finding_evidence_hash, lexicon_evidence_hash};
use crate::pipeline::lexicon::LexiconMatch;
use crate::pipeline::text::{char_slice, CharIndex};
use crate::taxonomy::{normalize_atom_id, Taxonomy};

/// Mandatory lexicon hits are never reported below this severity.
pub const MANDATORY_SEVERITY_FLOOR: Severity = Severity::High;

/// Evidence excerpt for a global span.
///
/// Taken from the job's canonical text when one exists so stored evidence
/// matches what downstream viewers reconstruct; otherwise from the chunk.
pub fn evidence_excerpt(
    canonical: Option<&CharIndex<'_>>,
    chunk: &Chunk,
    global_start: usize,
    global_end: usize,
    fallback: &str,
) -> String {
    if let Some(index) = canonical {
        let excerpt = index.slice(global_start, global_end);
        if !excerpt.is_empty() {
            return excerpt.to_string();
        }
    }
    let local_start = global_start.saturating_sub(chunk.start_offset);
    let local_end = global_end.saturating_sub(chunk.start_offset);
    let excerpt = char_slice(&chunk.text, local_start, local_end);
    if excerpt.is_empty() {
        fallback.to_string()
    } else {
        excerpt.to_string()
    }
}

/// Canonical atom id if it is valid for the article, else `None` (with a warning).
pub fn validated_atom(taxonomy: &Taxonomy, article_id: u32, raw: Option<&str>) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let canonical = normalize_atom_id(raw, article_id);
    match canonical {
        Some(atom) if taxonomy.is_valid_atom(article_id, Some(&atom)) => Some(atom),
        _ => {
            tracing::warn!(article_id, atom_id = raw, "Invalid atom id for article, clearing");
            None
        }
    }
}

pub fn lexicon_finding(
    job: &Job,
    chunk: &Chunk,
    taxonomy: &Taxonomy,
    canonical: Option<&CharIndex<'_>>,
    hit: &LexiconMatch,
) -> Finding {
    let global_start = chunk.start_offset + hit.start_offset;
    let global_end = chunk.start_offset + hit.end_offset;
    let snippet = match canonical {
        Some(index) => {
            let excerpt = index.slice(global_start, global_end);
            if excerpt.is_empty() {
                hit.matched_text.clone()
            } else {
                excerpt.to_string()
            }
        }
        None => hit.matched_text.clone(),
    };
    let script_line = chunk.start_line + hit.line - 1;

    Finding {
        id: Uuid::new_v4().to_string(),
        job_id: job.id.clone(),
        script_id: job.script_id.clone(),
        version_id: job.version_id.clone(),
        source: FindingSource::LexiconMandatory,
        article_id: hit.article_id,
        atom_id: validated_atom(taxonomy, hit.article_id, hit.atom_id.as_deref()),
        severity: hit.severity.max(MANDATORY_SEVERITY_FLOOR),
        confidence: 1.0,
        title: format!("Lexicon term: {}", hit.term),
        description: hit.description.clone().unwrap_or_default(),
        evidence_snippet: snippet,
        start_offset: global_start,
        end_offset: global_end,
        start_line: hit.line,
        end_line: hit.line + hit.matched_text.matches('\n').count(),
        location: json!({
            "chunk_id": chunk.id,
            "chunk_index": chunk.chunk_index,
            "line": hit.line,
            "column": hit.column,
            "script_line": script_line,
            "term_id": hit.term_id,
        }),
        is_interpretive: false,
        evidence_hash: lexicon_evidence_hash(&job.id, hit.article_id, &hit.term, script_line),
    }
}

/// Bind a guarded draft to the job. The evidence hash is computed over the
/// canonical excerpt, not the model's snippet, so it stays stable when the
/// model varies whitespace.
pub fn ai_finding(
    job: &Job,
    chunk: &Chunk,
    canonical: Option<&CharIndex<'_>>,
    draft: &DraftFinding,
) -> Finding {
    let excerpt = evidence_excerpt(
        canonical,
        chunk,
        draft.start_offset,
        draft.end_offset,
        &draft.evidence_snippet,
    );
    let evidence_hash = finding_evidence_hash(
        draft.article_id,
        draft.atom_id.as_deref(),
        draft.start_offset,
        draft.end_offset,
        &excerpt,
    );

    Finding {
        id: Uuid::new_v4().to_string(),
        job_id: job.id.clone(),
        script_id: job.script_id.clone(),
        version_id: job.version_id.clone(),
        source: FindingSource::Ai,
        article_id: draft.article_id,
        atom_id: draft.atom_id.clone(),
        severity: draft.severity,
        confidence: draft.confidence,
        title: draft.title.clone(),
        description: draft.description.clone(),
        evidence_snippet: excerpt,
        start_offset: draft.start_offset,
        end_offset: draft.end_offset,
        start_line: draft.start_line,
        end_line: draft.end_line,
        location: json!({
            "chunk_id": chunk.id,
            "chunk_index": chunk.chunk_index,
        }),
        is_interpretive: draft.is_interpretive,
        evidence_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkStatus, EnforcementMode, JobStatus};

    fn job() -> Job {
        Job {
            id: "job-1".into(),
            script_id: "s".into(),
            version_id: "v".into(),
            status: JobStatus::Running,
            progress_total: 2,
            progress_done: 0,
            progress_percent: 0,
            config_snapshot: serde_json::Value::Null,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            started_at: None,
            completed_at: None,
        }
    }

    fn chunk(text: &str, start_offset: usize) -> Chunk {
        Chunk {
            id: "c1".into(),
            job_id: "job-1".into(),
            chunk_index: 0,
            text: text.into(),
            start_offset,
            end_offset: start_offset + text.chars().count(),
            start_line: 10,
            end_line: 10,
            status: ChunkStatus::Judging,
            last_error: None,
            lease_token: Some("lease-1".into()),
        }
    }

    fn hit() -> LexiconMatch {
        LexiconMatch {
            term_id: "t1".into(),
            term: "damn".into(),
            article_id: 5,
            atom_id: Some("5.2".into()),
            severity: Severity::Low,
            enforcement_mode: EnforcementMode::Mandatory,
            description: None,
            matched_text: "Damn".into(),
            start_offset: 0,
            end_offset: 4,
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn lexicon_finding_applies_floor_and_canonical_excerpt() {
        let canonical = "xxxxxDAMN it";
        let index = CharIndex::new(canonical);
        let f = lexicon_finding(
            &job(),
            &chunk("Damn it", 5),
            &Taxonomy::bundled().unwrap(),
            Some(&index),
            &hit(),
        );
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.source, FindingSource::LexiconMandatory);
        assert_eq!(f.evidence_snippet, "DAMN");
        assert_eq!((f.start_offset, f.end_offset), (5, 9));
        assert_eq!(f.atom_id.as_deref(), Some("5-2"));
        assert_eq!(f.location["script_line"], 10);
    }

    #[test]
    fn lexicon_finding_falls_back_to_matched_text() {
        let f = lexicon_finding(
            &job(),
            &chunk("Damn it", 5),
            &Taxonomy::bundled().unwrap(),
            None,
            &hit(),
        );
        assert_eq!(f.evidence_snippet, "Damn");
    }

    #[test]
    fn invalid_atom_is_cleared_not_rejected() {
        let taxonomy = Taxonomy::bundled().unwrap();
        assert_eq!(validated_atom(&taxonomy, 5, Some("99-1")), None);
        assert_eq!(validated_atom(&taxonomy, 5, Some("5.2")).as_deref(), Some("5-2"));
        assert_eq!(validated_atom(&taxonomy, 8, None), None);
    }

    #[test]
    fn ai_hash_uses_excerpt_not_model_snippet() {
        let c = chunk("you  fool", 0);
        let draft = DraftFinding {
            article_id: 5,
            atom_id: None,
            severity: Severity::Medium,
            confidence: 0.7,
            title: "t".into(),
            description: String::new(),
            evidence_snippet: "you fool".into(),
            start_offset: 0,
            end_offset: 9,
            start_line: 1,
            end_line: 1,
            is_interpretive: false,
        };
        let mut paraphrased = draft.clone();
        paraphrased.evidence_snippet = "you   fool".into();

        let a = ai_finding(&job(), &c, None, &draft);
        let b = ai_finding(&job(), &c, None, &paraphrased);
        assert_eq!(a.evidence_snippet, "you  fool");
        assert_eq!(a.evidence_hash, b.evidence_hash);
    }
}
