pub mod sqlite;

pub use sqlite::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Stored JSON is invalid in {column}: {reason}")]
    InvalidJson { column: String, reason: String },
}

impl DatabaseError {
    pub(crate) fn json(column: &str, err: serde_json::Error) -> Self {
        Self::InvalidJson {
            column: column.to_string(),
            reason: err.to_string(),
        }
    }
}
