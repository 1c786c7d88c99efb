use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Variant order is the declared order, so `Ord` follows it.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(JobStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
});

str_enum!(ChunkStatus {
    Pending => "pending",
    Judging => "judging",
    Done => "done",
    Failed => "failed",
});

str_enum!(FindingSource {
    Ai => "ai",
    Manual => "manual",
    LexiconMandatory => "lexicon_mandatory",
});

str_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

str_enum!(TermType {
    Word => "word",
    Phrase => "phrase",
    Regex => "regex",
});

str_enum!(EnforcementMode {
    Mandatory => "mandatory",
    Advisory => "advisory",
});

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[Self::Low, Self::Medium, Self::High, Self::Critical]
    }

    /// Rank used for sorting: higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}
