//! Content-addressed identities: finding evidence hashes, run keys, prompt hashes.
//!
//! All hashes are lowercase hex SHA-256 over fields joined with a unit
//! separator, so adjacent fields can never run together ambiguously.

use sha2::{Digest, Sha256};

use crate::models::{JobConfig, PromptHashes};

/// Bumped whenever chunk processing changes in a way that invalidates cached runs.
pub const PIPELINE_LOGIC_VERSION: &str = "chunk-pipeline/v3";

const FIELD_SEPARATOR: char = '\u{1f}';

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

pub(crate) fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Identity of a mandatory lexicon finding: one per (job, article, term, line).
pub fn lexicon_evidence_hash(job_id: &str, article_id: u32, term: &str, line: usize) -> String {
    hash_fields(&[job_id, &article_id.to_string(), term, &line.to_string()])
}

/// Identity of an AI finding: article, atom, global span and evidence text.
pub fn finding_evidence_hash(
    article_id: u32,
    atom_id: Option<&str>,
    start_offset: usize,
    end_offset: usize,
    snippet: &str,
) -> String {
    hash_fields(&[
        &article_id.to_string(),
        atom_id.unwrap_or(""),
        &start_offset.to_string(),
        &end_offset.to_string(),
        snippet,
    ])
}

/// Cache key for one (chunk text, configuration) pair.
///
/// `taxonomy` is the catalog fingerprint, since its reference text is part
/// of every judge prompt. `variant` distinguishes pipeline modes that change
/// outputs for the same configuration (high-recall routing bypass).
pub fn run_key(
    text: &str,
    config: &JobConfig,
    prompts: &PromptHashes,
    taxonomy: &str,
    variant: &str,
) -> String {
    let temperature = config
        .temperature
        .map(|t| format!("{t:.3}"))
        .unwrap_or_default();
    let seed = config.seed.map(|s| s.to_string()).unwrap_or_default();
    let logic_version = if variant.is_empty() {
        PIPELINE_LOGIC_VERSION.to_string()
    } else {
        format!("{PIPELINE_LOGIC_VERSION}+{variant}")
    };
    hash_fields(&[
        text,
        &config.router_model,
        &config.judge_model,
        &temperature,
        &seed,
        &prompts.router,
        &prompts.judge,
        &prompts.repair,
        taxonomy,
        &logic_version,
    ])
}
