//! Per-chunk analysis: lexicon, cached AI run, evidence guard, persistence.

pub mod dedup;
pub mod findings;
pub mod runner;
pub mod verbatim;
pub mod windows;

pub use runner::{ChunkPipeline, ChunkReport, PipelineOptions};
