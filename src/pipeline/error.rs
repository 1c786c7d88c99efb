//! Pipeline error types.
//!
//! Only failures that abort a chunk or an aggregation surface here.
//! Recoverable LLM failures are folded into typed outcomes by the gateway.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::ConfigError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid job configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}
