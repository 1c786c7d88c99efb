use serde::{Deserialize, Serialize};

use super::enums::{ChunkStatus, JobStatus};

/// Router/judge model used when a job snapshot does not name one.
pub const DEFAULT_ROUTER_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4.1";
pub const DEFAULT_MAX_ROUTER_CANDIDATES: usize = 8;

/// Values forced by the `--deterministic` override.
pub const DETERMINISTIC_TEMPERATURE: f32 = 0.0;
pub const DETERMINISTIC_SEED: i64 = 42;

/// One analysis run for a specific script version.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub script_id: String,
    pub version_id: String,
    pub status: JobStatus,
    pub progress_total: i64,
    pub progress_done: i64,
    pub progress_percent: i64,
    pub config_snapshot: serde_json::Value,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Job {
    /// Parse and validate the configuration snapshot carried by this job.
    pub fn config(&self) -> Result<JobConfig, ConfigError> {
        let config = JobConfig::from_snapshot(&self.config_snapshot)?;
        config.validate()?;
        Ok(config)
    }
}

/// A contiguous slice of a job's source text.
/// Offsets are global char offsets into the script; lines are 1-based.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub job_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub status: ChunkStatus,
    pub last_error: Option<String>,
    /// Token of the lease this copy was read under, if any.
    pub lease_token: Option<String>,
}

/// Hashes of the prompt templates a job was configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptHashes {
    pub router: String,
    pub judge: String,
    pub repair: String,
}

/// Typed per-job configuration snapshot.
///
/// Missing fields fall back to defaults; the snapshot is validated once
/// when the job's first chunk is processed and then carried immutably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub router_model: String,
    pub judge_model: String,
    pub temperature: Option<f32>,
    pub seed: Option<i64>,
    pub max_router_candidates: usize,
    pub prompt_hashes: Option<PromptHashes>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            router_model: DEFAULT_ROUTER_MODEL.to_string(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            temperature: None,
            seed: None,
            max_router_candidates: DEFAULT_MAX_ROUTER_CANDIDATES,
            prompt_hashes: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Config snapshot is not a valid object: {0}")]
    Malformed(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl JobConfig {
    /// Deserialize from the stored snapshot. `null` yields the defaults.
    pub fn from_snapshot(snapshot: &serde_json::Value) -> Result<Self, ConfigError> {
        if snapshot.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(snapshot.clone()).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_model.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "router_model",
                reason: "must not be empty".into(),
            });
        }
        if self.judge_model.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "judge_model",
                reason: "must not be empty".into(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::InvalidField {
                    field: "temperature",
                    reason: format!("{t} is outside [0, 2]"),
                });
            }
        }
        if !(1..=25).contains(&self.max_router_candidates) {
            return Err(ConfigError::InvalidField {
                field: "max_router_candidates",
                reason: format!("{} is outside [1, 25]", self.max_router_candidates),
            });
        }
        Ok(())
    }

    /// Fill temperature and seed with deterministic values where unset.
    pub fn with_deterministic_defaults(mut self) -> Self {
        self.temperature.get_or_insert(DETERMINISTIC_TEMPERATURE);
        self.seed.get_or_insert(DETERMINISTIC_SEED);
        self
    }
}
