//! Second-stage judging with schema validation and bounded JSON repair.
//!
//! One judge call, then at most one repair call: `MAX_JUDGE_ATTEMPTS`
//! validations in total. A call that never validates contributes no
//! findings and is reported as `Exhausted` so the caller can flag the
//! chunk as degraded.

use serde::Deserialize;

use super::client::{CompletionRequest, LlmClient, LlmRole};
use super::parser::{array_field, parse_json_payload};
use super::prompt::{build_judge_prompt, build_repair_prompt, JUDGE_SYSTEM, REPAIR_SYSTEM};
use super::LlmError;
use crate::models::{JobConfig, Severity};

/// Judge call plus one repair.
pub const MAX_JUDGE_ATTEMPTS: usize = 2;

/// One schema-valid finding as reported by the model. Offsets and lines
/// are relative to the judged passage.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeFinding {
    pub article_id: u32,
    pub atom_id: Option<String>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub confidence: f32,
    pub is_interpretive: bool,
    pub evidence_snippet: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug)]
pub enum JudgeOutcome {
    Validated(Vec<JudgeFinding>),
    /// Output never passed validation within the attempt budget.
    Exhausted { last_error: String },
    /// The service could not be reached or timed out.
    Unavailable { error: String },
}

impl JudgeOutcome {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Validated(_))
    }

    pub fn into_findings(self) -> Vec<JudgeFinding> {
        match self {
            Self::Validated(findings) => findings,
            _ => Vec::new(),
        }
    }
}

pub struct JudgeRequest<'a> {
    pub text: &'a str,
    pub global_start: usize,
    pub global_end: usize,
    /// Article and atom reference for the selected articles.
    pub reference: &'a str,
}

/// Wire shape; loose types are tightened in `validate`.
#[derive(Deserialize)]
struct WireFinding {
    article_id: Option<serde_json::Value>,
    #[serde(default)]
    atom_id: Option<serde_json::Value>,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    severity: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    is_interpretive: Option<bool>,
    evidence_snippet: Option<String>,
    #[serde(default)]
    start_offset: Option<i64>,
    #[serde(default)]
    end_offset: Option<i64>,
    #[serde(default)]
    start_line: Option<i64>,
    #[serde(default)]
    end_line: Option<i64>,
}

fn invalid(index: usize, reason: &str) -> LlmError {
    LlmError::InvalidOutput(format!("finding {index}: {reason}"))
}

fn as_article_id(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl WireFinding {
    fn validate(self, index: usize) -> Result<JudgeFinding, LlmError> {
        let article_id = self
            .article_id
            .as_ref()
            .and_then(as_article_id)
            .filter(|id| *id > 0)
            .ok_or_else(|| invalid(index, "article_id must be a positive integer"))?;

        let atom_id = match self.atom_id {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
            Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(_) => return Err(invalid(index, "atom_id must be a string or null")),
        };

        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid(index, "title is required"))?;

        let severity = self
            .severity
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .and_then(|s| s.parse::<Severity>().ok())
            .ok_or_else(|| invalid(index, "severity must be low, medium, high or critical"))?;

        let confidence = self
            .confidence
            .filter(|c| (0.0..=1.0).contains(c))
            .ok_or_else(|| invalid(index, "confidence must be within [0, 1]"))?;

        let evidence_snippet = self
            .evidence_snippet
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid(index, "evidence_snippet is required"))?;

        let non_negative = |v: Option<i64>, field: &str| -> Result<usize, LlmError> {
            match v {
                None => Ok(0),
                Some(n) if n >= 0 => Ok(n as usize),
                Some(_) => Err(invalid(index, &format!("{field} must be non-negative"))),
            }
        };
        let start_offset = non_negative(self.start_offset, "start_offset")?;
        let end_offset = non_negative(self.end_offset, "end_offset")?;
        let start_line = non_negative(self.start_line, "start_line")?.max(1);
        let end_line = non_negative(self.end_line, "end_line")?.max(start_line);

        Ok(JudgeFinding {
            article_id,
            atom_id,
            title,
            description: self.description.unwrap_or_default(),
            severity,
            confidence: confidence as f32,
            is_interpretive: self.is_interpretive.unwrap_or(false),
            evidence_snippet,
            start_offset,
            end_offset: end_offset.max(start_offset),
            start_line,
            end_line,
        })
    }
}

/// Validate a judge completion against the findings schema.
pub fn parse_judge_output(response: &str) -> Result<Vec<JudgeFinding>, LlmError> {
    let payload = parse_json_payload(response)?;
    let items = array_field(&payload, "findings")?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let wire: WireFinding = serde_json::from_value(item.clone())
                .map_err(|e| invalid(index, &e.to_string()))?;
            wire.validate(index)
        })
        .collect()
}

/// Judge one passage. Never fails: transport and validation problems
/// become `Unavailable` / `Exhausted`.
pub fn judge(client: &dyn LlmClient, config: &JobConfig, request: &JudgeRequest<'_>) -> JudgeOutcome {
    let judge_call = CompletionRequest {
        role: LlmRole::Judge,
        model: config.judge_model.clone(),
        system: JUDGE_SYSTEM.to_string(),
        user: build_judge_prompt(
            request.reference,
            request.text,
            request.global_start,
            request.global_end,
        ),
        temperature: config.temperature,
        seed: config.seed,
        json_mode: true,
    };

    let mut response = match client.complete(&judge_call) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, global_start = request.global_start, "Judge call failed");
            return JudgeOutcome::Unavailable {
                error: e.to_string(),
            };
        }
    };

    let mut last_error = String::new();
    for attempt in 1..=MAX_JUDGE_ATTEMPTS {
        match parse_judge_output(&response) {
            Ok(findings) => {
                tracing::debug!(attempt, findings = findings.len(), "Judge output validated");
                return JudgeOutcome::Validated(findings);
            }
            Err(e) => last_error = e.to_string(),
        }

        if attempt == MAX_JUDGE_ATTEMPTS {
            break;
        }

        tracing::debug!(attempt, error = %last_error, "Judge output invalid, requesting repair");
        let repair_call = CompletionRequest {
            role: LlmRole::Repair,
            model: config.judge_model.clone(),
            system: REPAIR_SYSTEM.to_string(),
            user: build_repair_prompt(&response, &last_error),
            temperature: config.temperature,
            seed: config.seed,
            json_mode: true,
        };
        response = match client.complete(&repair_call) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Repair call failed");
                return JudgeOutcome::Unavailable {
                    error: e.to_string(),
                };
            }
        };
    }

    tracing::warn!(
        global_start = request.global_start,
        error = %last_error,
        "Judge output still invalid after repair, contributing no findings"
    );
    JudgeOutcome::Exhausted { last_error }
}
