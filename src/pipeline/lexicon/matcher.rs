//! Term compilation and scanning.
//!
//! Words match on Unicode word boundaries, phrases match anywhere, regex
//! terms use the stored pattern. All matching is case-insensitive.

use regex::{Regex, RegexBuilder};

use super::{LexiconError, LexiconMatch, LexiconTerm};
use crate::models::TermType;
use crate::pipeline::text::CharIndex;

/// Compiled pattern size cap for user-supplied regex terms.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug)]
pub struct CompiledTerm {
    pub term: LexiconTerm,
    regex: Regex,
}

impl CompiledTerm {
    pub fn compile(term: LexiconTerm) -> Result<Self, LexiconError> {
        let trimmed = term.term.trim();
        if trimmed.is_empty() {
            return Err(LexiconError::InvalidPattern {
                term_id: term.id.clone(),
                reason: "empty term".into(),
            });
        }

        let pattern = match term.term_type {
            TermType::Word => format!(r"\b{}\b", regex::escape(trimmed)),
            TermType::Phrase => regex::escape(trimmed),
            TermType::Regex => trimmed.to_string(),
        };

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| LexiconError::InvalidPattern {
                term_id: term.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { term, regex })
    }

    /// Every non-empty match of this term in `text`.
    pub fn scan(&self, text: &str, index: &CharIndex<'_>) -> Vec<LexiconMatch> {
        self.regex
            .find_iter(text)
            .filter(|m| !m.as_str().is_empty())
            .map(|m| {
                let start = index.char_at_byte(m.start());
                let end = index.char_at_byte(m.end());
                LexiconMatch {
                    term_id: self.term.id.clone(),
                    term: self.term.term.clone(),
                    article_id: self.term.article_id,
                    atom_id: self.term.atom_id.clone(),
                    severity: self.term.severity,
                    enforcement_mode: self.term.enforcement_mode,
                    description: self.term.description.clone(),
                    matched_text: m.as_str().to_string(),
                    start_offset: start,
                    end_offset: end,
                    line: index.line_of(start),
                    column: index.column_of(start),
                }
            })
            .collect()
    }
}
