pub mod aggregation;
pub mod chunk;
pub mod error;
pub mod hashing;
pub mod jobs; // Work claiming + job state over the shared store
pub mod lexicon;
pub mod llm; // Router / judge / repair gateway
pub mod store;
pub mod text;
pub mod traits;

pub use error::PipelineError;
