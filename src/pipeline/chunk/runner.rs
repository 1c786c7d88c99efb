//! Chunk pipeline: one claimed chunk in, persisted findings out.
//!
//! Steps, in order: empty guard, lexicon pass, run-key lookup, then on a
//! cache miss routing, judging (full chunk plus micro-windows), verbatim
//! guard, dedup and overlap collapse, run-cache write. Findings are
//! inserted with duplicate-hash-ignored semantics so a retried chunk
//! converges on the same rows.

use crate::models::{Chunk, ChunkRun, DraftFinding, Job, JobConfig};
use crate::pipeline::error::PipelineError;
use crate::pipeline::hashing::run_key;
use crate::pipeline::lexicon::LexiconMatcher;
use crate::pipeline::llm::prompt::current_prompt_hashes;
use crate::pipeline::llm::{judge, route, JudgeFinding, JudgeRequest, LlmClient};
use crate::pipeline::text::CharIndex;
use crate::pipeline::traits::AnalysisStore;
use crate::taxonomy::Taxonomy;

use super::dedup::{collapse_overlaps, dedupe_drafts};
use super::findings::{ai_finding, lexicon_finding, validated_atom};
use super::verbatim::locate_evidence;
use super::windows::{micro_windows, Window};

/// Articles judged per chunk after the router/always-check union.
pub const MAX_JUDGED_ARTICLES: usize = 25;

/// Run-key variant for runs that bypassed the router.
const HIGH_RECALL_VARIANT: &str = "high-recall";

/// Process-wide overrides from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Judge every scannable article instead of routing.
    pub high_recall: bool,
    /// Force temperature 0 and a fixed seed where the job leaves them unset.
    pub deterministic: bool,
}

/// What happened to one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub lexicon_findings: usize,
    pub ai_findings: usize,
    /// Rows actually written; retries see fewer.
    pub inserted: usize,
    pub cache_hit: bool,
    pub degraded: bool,
}

pub struct ChunkPipeline<'a> {
    store: &'a dyn AnalysisStore,
    llm: &'a dyn LlmClient,
    taxonomy: &'a Taxonomy,
    lexicon: &'a LexiconMatcher,
    options: PipelineOptions,
}

impl<'a> ChunkPipeline<'a> {
    pub fn new(
        store: &'a dyn AnalysisStore,
        llm: &'a dyn LlmClient,
        taxonomy: &'a Taxonomy,
        lexicon: &'a LexiconMatcher,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            llm,
            taxonomy,
            lexicon,
            options,
        }
    }

    /// Process a chunk already leased by the caller, then mark it done and
    /// advance job progress. On `Err` the caller owns failing the chunk.
    pub fn process(&self, job: &Job, chunk: &Chunk) -> Result<ChunkReport, PipelineError> {
        let mut config = job.config()?;
        if self.options.deterministic {
            config = config.with_deterministic_defaults();
        }

        let mut report = ChunkReport::default();

        if chunk.text.trim().is_empty() {
            tracing::debug!(chunk_id = %chunk.id, "Empty chunk, nothing to judge");
            self.settle(job, chunk, false)?;
            return Ok(report);
        }

        let canonical_text = self.store.canonical_text(&job.id)?;
        let canonical = canonical_text.as_deref().map(CharIndex::new);

        // ── Lexicon ──────────────────────────────────────────
        let matches = self.lexicon.find_matches(&chunk.text);
        for hit in &matches.advisory {
            tracing::debug!(
                chunk_id = %chunk.id,
                term_id = %hit.term_id,
                article_id = hit.article_id,
                "Advisory lexicon signal"
            );
        }
        for hit in &matches.mandatory {
            if self.taxonomy.article(hit.article_id).is_none() {
                tracing::warn!(
                    term_id = %hit.term_id,
                    article_id = hit.article_id,
                    "Lexicon term references unknown article, skipping"
                );
                continue;
            }
            let finding = lexicon_finding(job, chunk, self.taxonomy, canonical.as_ref(), hit);
            report.lexicon_findings += 1;
            if self.store.upsert_finding(&finding)? {
                report.inserted += 1;
            }
        }

        // ── AI run (cached by content + config) ──────────────
        let prompts = config
            .prompt_hashes
            .clone()
            .unwrap_or_else(current_prompt_hashes);
        let variant = if self.options.high_recall {
            HIGH_RECALL_VARIANT
        } else {
            ""
        };
        let key = run_key(
            &chunk.text,
            &config,
            &prompts,
            self.taxonomy.fingerprint(),
            variant,
        );

        let drafts = match self.store.get_run(&key)? {
            Some(run) => {
                tracing::debug!(chunk_id = %chunk.id, run_key = %key, "Run cache hit");
                report.cache_hit = true;
                report.degraded = run.judge_failures > 0;
                let base = run.offset_base;
                run.findings
                    .into_iter()
                    .map(|f| f.rebased(base, chunk.start_offset))
                    .collect::<Vec<_>>()
            }
            None => {
                let run = self.compute_run(job, chunk, &config, key)?;
                report.degraded = run.judge_failures > 0;
                self.store.put_run(&run)?;
                run.findings
            }
        };

        for draft in &drafts {
            let finding = ai_finding(job, chunk, canonical.as_ref(), draft);
            report.ai_findings += 1;
            if self.store.upsert_finding(&finding)? {
                report.inserted += 1;
            }
        }

        if !self.settle(job, chunk, report.degraded)? {
            return Ok(report);
        }

        tracing::info!(
            job_id = %job.id,
            chunk_id = %chunk.id,
            chunk_index = chunk.chunk_index,
            lexicon = report.lexicon_findings,
            ai = report.ai_findings,
            inserted = report.inserted,
            cache_hit = report.cache_hit,
            degraded = report.degraded,
            "Chunk processed"
        );
        Ok(report)
    }

    /// Mark the chunk done and count it towards job progress. A lease that
    /// was reclaimed in the meantime belongs to another worker, so nothing
    /// is counted and false is returned.
    fn settle(&self, job: &Job, chunk: &Chunk, degraded: bool) -> Result<bool, PipelineError> {
        if !self.store.complete_chunk(chunk, degraded)? {
            tracing::warn!(
                job_id = %job.id,
                chunk_id = %chunk.id,
                "Chunk lease was reclaimed before completion, leaving it to the new holder"
            );
            return Ok(false);
        }
        self.store.increment_job_progress(&job.id)?;
        Ok(true)
    }

    /// Articles to judge and the router's own picks (for the run record).
    fn select_articles(&self, config: &JobConfig, text: &str) -> (Vec<u32>, Vec<u32>) {
        let scannable = self.taxonomy.scannable_article_ids();
        if self.options.high_recall {
            return (scannable, Vec::new());
        }

        // A fallback contributes nothing; the always-check set still applies.
        let routed = route(self.llm, self.taxonomy, config, &scannable, text).article_ids();

        let mut selected = self.taxonomy.always_check_ids();
        for id in &routed {
            if !selected.contains(id) {
                selected.push(*id);
            }
        }
        selected.truncate(MAX_JUDGED_ARTICLES);
        selected.sort_unstable();
        (selected, routed)
    }

    fn compute_run(
        &self,
        job: &Job,
        chunk: &Chunk,
        config: &JobConfig,
        key: String,
    ) -> Result<ChunkRun, PipelineError> {
        let (articles, router_candidates) = self.select_articles(config, &chunk.text);
        let reference = self.taxonomy.reference_text(&articles);
        let index = CharIndex::new(&chunk.text);
        let len = index.char_len();

        let mut passages = vec![Window { start: 0, end: len }];
        passages.extend(micro_windows(len));

        let mut judge_failures = 0u32;
        let mut drafts = Vec::new();
        for window in passages {
            let request = JudgeRequest {
                text: index.slice(window.start, window.end),
                global_start: chunk.start_offset + window.start,
                global_end: chunk.start_offset + window.end,
                reference: &reference,
            };
            let outcome = judge(self.llm, config, &request);
            if outcome.is_degraded() {
                judge_failures += 1;
            }
            drafts.extend(
                outcome
                    .into_findings()
                    .into_iter()
                    .filter_map(|f| self.ground(chunk, &index, window.start, f)),
            );
        }

        let findings = collapse_overlaps(dedupe_drafts(drafts));
        tracing::debug!(
            chunk_id = %chunk.id,
            articles = articles.len(),
            findings = findings.len(),
            judge_failures,
            "Chunk judged"
        );

        Ok(ChunkRun {
            run_key: key,
            job_id: job.id.clone(),
            chunk_id: chunk.id.clone(),
            offset_base: chunk.start_offset,
            findings,
            router_candidates,
            judge_failures,
        })
    }

    /// Tie a judge finding to real chunk text, or drop it.
    fn ground(
        &self,
        chunk: &Chunk,
        index: &CharIndex<'_>,
        window_start: usize,
        finding: JudgeFinding,
    ) -> Option<DraftFinding> {
        match self.taxonomy.article(finding.article_id) {
            Some(article) if article.is_scannable() => {}
            _ => {
                tracing::debug!(article_id = finding.article_id, "Dropping finding for unscannable article");
                return None;
            }
        }

        let hint = window_start + finding.start_offset;
        let Some(span) = locate_evidence(&chunk.text, &finding.evidence_snippet, hint) else {
            tracing::debug!(
                chunk_id = %chunk.id,
                article_id = finding.article_id,
                "Evidence not found in chunk text, dropping finding"
            );
            return None;
        };

        let atom_id = validated_atom(self.taxonomy, finding.article_id, finding.atom_id.as_deref());
        let last_char = span.end.saturating_sub(1).max(span.start);

        Some(DraftFinding {
            article_id: finding.article_id,
            atom_id,
            severity: finding.severity,
            confidence: finding.confidence,
            title: finding.title,
            description: finding.description,
            evidence_snippet: index.slice(span.start, span.end).to_string(),
            start_offset: chunk.start_offset + span.start,
            end_offset: chunk.start_offset + span.end,
            start_line: index.line_of(span.start),
            end_line: index.line_of(last_char),
            is_interpretive: finding.is_interpretive,
        })
    }
}
