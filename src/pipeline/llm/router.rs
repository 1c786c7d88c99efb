//! First-stage routing: narrow the scannable articles to a ranked candidate set.

use std::cmp::Ordering;

use super::client::{CompletionRequest, LlmClient, LlmRole};
use super::parser::{array_field, parse_json_payload};
use super::prompt::{build_router_prompt, ROUTER_SYSTEM};
use super::LlmError;
use crate::models::JobConfig;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterCandidate {
    pub article_id: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Ranked, truncated candidates (possibly empty).
    Routed(Vec<RouterCandidate>),
    /// The call or its output failed; the caller uses the always-check set.
    Fallback { reason: String },
}

impl RouteOutcome {
    pub fn article_ids(&self) -> Vec<u32> {
        match self {
            Self::Routed(candidates) => candidates.iter().map(|c| c.article_id).collect(),
            Self::Fallback { .. } => Vec::new(),
        }
    }
}

/// Ask the router which of `pool` may apply to `text`.
pub fn route(
    client: &dyn LlmClient,
    taxonomy: &Taxonomy,
    config: &JobConfig,
    pool: &[u32],
    text: &str,
) -> RouteOutcome {
    let request = CompletionRequest {
        role: LlmRole::Router,
        model: config.router_model.clone(),
        system: ROUTER_SYSTEM.to_string(),
        user: build_router_prompt(taxonomy, pool, text),
        temperature: config.temperature,
        seed: config.seed,
        json_mode: true,
    };

    let parsed = client
        .complete(&request)
        .and_then(|response| parse_candidates(&response));

    match parsed {
        Ok(candidates) => RouteOutcome::Routed(rank_candidates(
            candidates,
            pool,
            config.max_router_candidates,
        )),
        Err(e) => {
            tracing::warn!(error = %e, "Router failed, falling back to always-check articles");
            RouteOutcome::Fallback {
                reason: e.to_string(),
            }
        }
    }
}

fn parse_candidates(response: &str) -> Result<Vec<RouterCandidate>, LlmError> {
    let payload = parse_json_payload(response)?;
    let items = array_field(&payload, "candidates")?;

    let mut candidates = Vec::with_capacity(items.len());
    for item in items {
        // Bare ids are accepted with neutral confidence.
        if let Some(id) = item.as_u64() {
            if let Ok(article_id) = u32::try_from(id) {
                candidates.push(RouterCandidate {
                    article_id,
                    confidence: 0.5,
                });
            }
            continue;
        }
        let Some(article_id) = item
            .get("article_id")
            .and_then(|v| v.as_u64())
            .and_then(|id| u32::try_from(id).ok())
        else {
            continue;
        };
        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0) as f32;
        candidates.push(RouterCandidate {
            article_id: article_id as u32,
            confidence,
        });
    }
    Ok(candidates)
}

/// Keep pool members only, one entry per article (highest confidence),
/// sorted by confidence desc then id asc, truncated to `max`.
pub fn rank_candidates(
    candidates: Vec<RouterCandidate>,
    pool: &[u32],
    max: usize,
) -> Vec<RouterCandidate> {
    let mut ranked: Vec<RouterCandidate> = Vec::new();
    for candidate in candidates.into_iter().filter(|c| pool.contains(&c.article_id)) {
        match ranked.iter_mut().find(|r| r.article_id == candidate.article_id) {
            Some(existing) if existing.confidence < candidate.confidence => *existing = candidate,
            Some(_) => {}
            None => ranked.push(candidate),
        }
    }
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.article_id.cmp(&b.article_id))
    });
    ranked.truncate(max);
    ranked
}
