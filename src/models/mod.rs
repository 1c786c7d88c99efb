pub mod enums;
pub mod finding;
pub mod job;
pub mod report;

pub use enums::*;
pub use finding::{ChunkRun, DraftFinding, Finding};
pub use job::{Chunk, ConfigError, Job, JobConfig, PromptHashes};
pub use report::{ArticleSummary, ChecklistStatus, JobReport, ReportSummary, SeverityCounts};
