//! Lexicon matcher: deterministic term signals.
//!
//! Active terms are compiled into an immutable `LexiconSnapshot`. Readers
//! clone the current `Arc` and scan against it; `refresh()` builds a new
//! snapshot off to the side and swaps it in, so a reader never sees a
//! half-loaded term list. Concurrent refreshes are coalesced: a call that
//! finds another refresh in flight returns immediately.

pub mod matcher;
pub mod refresher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use rusqlite::params;
use thiserror::Error;

use crate::db::{now_timestamp, DatabaseError, SqliteStore};
use crate::models::{EnforcementMode, Severity, TermType};
use crate::pipeline::text::CharIndex;
use crate::pipeline::traits::TermSource;

pub use matcher::CompiledTerm;
pub use refresher::LexiconRefresher;

#[derive(Error, Debug)]
pub enum LexiconError {
    #[error("Failed to load lexicon terms: {0}")]
    Store(#[from] DatabaseError),

    #[error("Invalid pattern for term {term_id}: {reason}")]
    InvalidPattern { term_id: String, reason: String },

    #[error("Lexicon snapshot lock poisoned")]
    LockPoisoned,
}

/// One active term as stored in the lexicon.
#[derive(Debug, Clone, PartialEq)]
pub struct LexiconTerm {
    pub id: String,
    pub term: String,
    pub term_type: TermType,
    pub article_id: u32,
    pub atom_id: Option<String>,
    pub severity: Severity,
    pub enforcement_mode: EnforcementMode,
    pub description: Option<String>,
}

/// One occurrence of a term. Offsets are char offsets into the scanned
/// text; line/column are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct LexiconMatch {
    pub term_id: String,
    pub term: String,
    pub article_id: u32,
    pub atom_id: Option<String>,
    pub severity: Severity,
    pub enforcement_mode: EnforcementMode,
    pub description: Option<String>,
    pub matched_text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Default)]
pub struct LexiconMatches {
    /// Always surfaced as findings.
    pub mandatory: Vec<LexiconMatch>,
    /// Soft signals; never emitted as findings by the pipeline.
    pub advisory: Vec<LexiconMatch>,
}

/// Immutable compiled term set.
#[derive(Debug, Default)]
pub struct LexiconSnapshot {
    mandatory: Vec<CompiledTerm>,
    advisory: Vec<CompiledTerm>,
    loaded_at: Option<String>,
}

impl LexiconSnapshot {
    /// Compile terms, skipping (and logging) any that fail to compile.
    pub fn build(terms: Vec<LexiconTerm>) -> Self {
        let mut snapshot = Self {
            loaded_at: Some(now_timestamp()),
            ..Self::default()
        };
        for term in terms {
            let mode = term.enforcement_mode;
            match CompiledTerm::compile(term) {
                Ok(compiled) => match mode {
                    EnforcementMode::Mandatory => snapshot.mandatory.push(compiled),
                    EnforcementMode::Advisory => snapshot.advisory.push(compiled),
                },
                Err(e) => tracing::warn!(error = %e, "Skipping lexicon term"),
            }
        }
        snapshot
    }

    pub fn term_count(&self) -> usize {
        self.mandatory.len() + self.advisory.len()
    }

    pub fn loaded_at(&self) -> Option<&str> {
        self.loaded_at.as_deref()
    }

    pub fn find_matches(&self, text: &str) -> LexiconMatches {
        let index = CharIndex::new(text);
        let scan_all = |terms: &[CompiledTerm]| {
            let mut found: Vec<LexiconMatch> =
                terms.iter().flat_map(|t| t.scan(text, &index)).collect();
            found.sort_by(|a, b| {
                a.start_offset
                    .cmp(&b.start_offset)
                    .then_with(|| a.term_id.cmp(&b.term_id))
            });
            found
        };
        LexiconMatches {
            mandatory: scan_all(&self.mandatory),
            advisory: scan_all(&self.advisory),
        }
    }
}

/// Shared, refreshable lexicon.
#[derive(Debug, Default)]
pub struct LexiconMatcher {
    snapshot: RwLock<Arc<LexiconSnapshot>>,
    refreshing: AtomicBool,
}

/// Clears the in-flight flag even if a refresh unwinds.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LexiconMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Holders keep it alive across a concurrent swap.
    pub fn snapshot(&self) -> Arc<LexiconSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reload active terms and publish a new snapshot.
    ///
    /// Returns `Ok(false)` when another refresh was already running. On a
    /// load failure the previous snapshot stays in place.
    pub fn refresh(&self, source: &dyn TermSource) -> Result<bool, LexiconError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Lexicon refresh already in flight, coalescing");
            return Ok(false);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let terms = source.load_active_terms()?;
        let next = Arc::new(LexiconSnapshot::build(terms));
        let count = next.term_count();

        let mut slot = self.snapshot.write().map_err(|_| LexiconError::LockPoisoned)?;
        *slot = next;
        drop(slot);

        tracing::info!(terms = count, "Lexicon snapshot refreshed");
        Ok(true)
    }

    pub fn find_matches(&self, text: &str) -> LexiconMatches {
        self.snapshot().find_matches(text)
    }
}

impl TermSource for SqliteStore {
    fn load_active_terms(&self) -> Result<Vec<LexiconTerm>, DatabaseError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, term, term_type, article_id, atom_id, severity, enforcement_mode, description
             FROM lexicon_terms
             WHERE is_active = 1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, term, term_type, article_id, atom_id, severity, mode, description)|
                 -> Result<LexiconTerm, DatabaseError> {
                    Ok(LexiconTerm {
                        id,
                        term,
                        term_type: term_type.parse()?,
                        article_id: article_id.max(0) as u32,
                        atom_id,
                        severity: severity.parse()?,
                        enforcement_mode: mode.parse()?,
                        description,
                    })
                },
            )
            .collect()
    }
}

/// Fixed term list (for testing).
#[cfg(test)]
pub(crate) struct StaticTerms(pub Vec<LexiconTerm>);

#[cfg(test)]
impl TermSource for StaticTerms {
    fn load_active_terms(&self) -> Result<Vec<LexiconTerm>, DatabaseError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
pub(crate) fn test_term(id: &str, term: &str, mode: EnforcementMode) -> LexiconTerm {
    LexiconTerm {
        id: id.into(),
        term: term.into(),
        term_type: TermType::Word,
        article_id: 7,
        atom_id: None,
        severity: Severity::Low,
        enforcement_mode: mode,
        description: None,
    }
}
