//! Finding dedup and overlap collapse.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

use crate::models::{DraftFinding, Finding, Severity};
use crate::pipeline::hashing::finding_evidence_hash;

/// Span overlap above which a weaker finding on the same taxonomy node is dropped.
pub const OVERLAP_COLLAPSE_RATIO: f64 = 0.5;

/// Anything that can be ranked for "keep the strongest" decisions.
pub trait Ranked {
    fn severity(&self) -> Severity;
    fn confidence(&self) -> f32;
    fn is_interpretive(&self) -> bool;
}

impl Ranked for DraftFinding {
    fn severity(&self) -> Severity {
        self.severity
    }
    fn confidence(&self) -> f32 {
        self.confidence
    }
    fn is_interpretive(&self) -> bool {
        self.is_interpretive
    }
}

impl Ranked for Finding {
    fn severity(&self) -> Severity {
        self.severity
    }
    fn confidence(&self) -> f32 {
        self.confidence
    }
    fn is_interpretive(&self) -> bool {
        self.is_interpretive
    }
}

/// Strongest first: higher severity, then higher confidence, then
/// non-interpretive before interpretive.
pub fn by_strength<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.severity()
        .cmp(&a.severity())
        .then_with(|| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.is_interpretive().cmp(&b.is_interpretive()))
}

/// Keep one item per key, the strongest. First-seen order is preserved.
pub fn dedupe_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    T: Ranked,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        match slots.get(&k) {
            Some(&pos) => {
                if by_strength(&item, &kept[pos]) == Ordering::Less {
                    kept[pos] = item;
                }
            }
            None => {
                slots.insert(k, kept.len());
                kept.push(item);
            }
        }
    }
    kept
}

/// Dedupe AI findings by evidence hash over (article, atom, span, snippet).
pub fn dedupe_drafts(findings: Vec<DraftFinding>) -> Vec<DraftFinding> {
    dedupe_by_key(findings, |f| {
        finding_evidence_hash(
            f.article_id,
            f.atom_id.as_deref(),
            f.start_offset,
            f.end_offset,
            &f.evidence_snippet,
        )
    })
}

fn overlap_ratio(candidate: &DraftFinding, kept: &DraftFinding) -> f64 {
    let start = candidate.start_offset.max(kept.start_offset);
    let end = candidate.end_offset.min(kept.end_offset);
    let intersection = end.saturating_sub(start);
    intersection as f64 / candidate.span_len().max(1) as f64
}

/// Within each (article, atom) group, greedily keep the strongest findings
/// whose overlap with every already-kept finding is at most the ratio.
/// Output is ordered by start offset, then article, then atom.
pub fn collapse_overlaps(findings: Vec<DraftFinding>) -> Vec<DraftFinding> {
    let mut groups: HashMap<(u32, Option<String>), Vec<DraftFinding>> = HashMap::new();
    for finding in findings {
        groups
            .entry((finding.article_id, finding.atom_id.clone()))
            .or_default()
            .push(finding);
    }

    let mut kept_all = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| by_strength(a, b).then_with(|| a.start_offset.cmp(&b.start_offset)));
        let mut kept: Vec<DraftFinding> = Vec::new();
        for candidate in group {
            if kept
                .iter()
                .all(|k| overlap_ratio(&candidate, k) <= OVERLAP_COLLAPSE_RATIO)
            {
                kept.push(candidate);
            }
        }
        kept_all.extend(kept);
    }

    kept_all.sort_by(|a, b| {
        a.start_offset
            .cmp(&b.start_offset)
            .then_with(|| a.article_id.cmp(&b.article_id))
            .then_with(|| a.atom_id.cmp(&b.atom_id))
            .then_with(|| a.end_offset.cmp(&b.end_offset))
    });
    kept_all
}
