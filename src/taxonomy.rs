//! Taxonomy reference: the fixed article/atom catalog.
//!
//! Loaded once per process and never mutated. Articles are kept sorted by
//! id so every listing (scannable set, report order) follows taxonomy order.
//! Atom ids are canonically `"<article>-<atom>"`; legacy `"5.2"` and bare
//! `"2"` forms are normalized against the owning article.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::hashing::sha256_hex;

/// Catalog compiled into the binary, used when no `--taxonomy` path is given.
const BUNDLED_TAXONOMY: &str = include_str!("../resources/taxonomy.json");

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Cannot read taxonomy file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Taxonomy JSON is invalid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate article id {0} in taxonomy")]
    DuplicateArticle(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Atom {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub atoms: Vec<Atom>,
    #[serde(default)]
    pub admin_only: bool,
    #[serde(default)]
    pub out_of_scope: bool,
    /// Judged on every chunk regardless of routing.
    #[serde(default)]
    pub always_check: bool,
}

impl Article {
    pub fn is_scannable(&self) -> bool {
        !self.admin_only && !self.out_of_scope
    }

    pub fn has_atom(&self, atom_id: &str) -> bool {
        self.atoms.iter().any(|a| a.id == atom_id)
    }
}

#[derive(Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    version: String,
    articles: Vec<Article>,
}

/// Immutable, indexed article/atom catalog.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    version: String,
    /// sha256 of the catalog source; reference text feeds judge prompts.
    fingerprint: String,
    articles: Vec<Article>,
    index: HashMap<u32, usize>,
}

impl Taxonomy {
    pub fn from_json(json: &str) -> Result<Self, TaxonomyError> {
        let file: TaxonomyFile = serde_json::from_str(json)?;
        let mut articles = file.articles;
        articles.sort_by_key(|a| a.id);

        let mut index = HashMap::with_capacity(articles.len());
        for (pos, article) in articles.iter_mut().enumerate() {
            if index.insert(article.id, pos).is_some() {
                return Err(TaxonomyError::DuplicateArticle(article.id));
            }
            // Store atoms in canonical form so lookups never re-normalize the catalog.
            for atom in &mut article.atoms {
                if let Some(canonical) = normalize_atom_id(&atom.id, article.id) {
                    atom.id = canonical;
                }
            }
        }

        Ok(Self {
            version: file.version,
            fingerprint: sha256_hex(json),
            articles,
            index,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let json = std::fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let taxonomy = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            version = %taxonomy.version,
            articles = taxonomy.articles.len(),
            "Taxonomy loaded"
        );
        Ok(taxonomy)
    }

    pub fn bundled() -> Result<Self, TaxonomyError> {
        Self::from_json(BUNDLED_TAXONOMY)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn article(&self, id: u32) -> Option<&Article> {
        self.index.get(&id).map(|&pos| &self.articles[pos])
    }

    /// All articles in taxonomy order.
    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    /// Articles eligible for scanning, in taxonomy order.
    /// Excludes admin-only and out-of-scope articles.
    pub fn scannable_article_ids(&self) -> Vec<u32> {
        self.articles
            .iter()
            .filter(|a| a.is_scannable())
            .map(|a| a.id)
            .collect()
    }

    pub fn always_check_ids(&self) -> Vec<u32> {
        self.articles
            .iter()
            .filter(|a| a.always_check && a.is_scannable())
            .map(|a| a.id)
            .collect()
    }

    pub fn is_out_of_scope(&self, article_id: u32) -> bool {
        self.article(article_id).is_some_and(|a| a.out_of_scope)
    }

    /// Whether `atom_id` may be attached to a finding for `article_id`.
    ///
    /// Null/empty is always valid. An atom whose article prefix differs from
    /// `article_id` is never valid. Otherwise an article without defined atoms
    /// accepts any atom, and an article with atoms requires membership.
    pub fn is_valid_atom(&self, article_id: u32, atom_id: Option<&str>) -> bool {
        let raw = match atom_id.map(str::trim) {
            None | Some("") => return true,
            Some(raw) => raw,
        };
        let Some(canonical) = normalize_atom_id(raw, article_id) else {
            return false;
        };
        if atom_article(&canonical) != Some(article_id) {
            return false;
        }
        match self.article(article_id) {
            None => true,
            Some(article) if article.atoms.is_empty() => true,
            Some(article) => article.has_atom(&canonical),
        }
    }

    /// Reference text for the given articles, as shown to the judge.
    pub fn reference_text(&self, article_ids: &[u32]) -> String {
        let mut out = String::new();
        for id in article_ids {
            let Some(article) = self.article(*id) else {
                continue;
            };
            out.push_str(&format!("Article {}: {}\n", article.id, article.title));
            for atom in &article.atoms {
                out.push_str(&format!("  - {} {}\n", atom.id, atom.title));
            }
        }
        out
    }
}

/// Normalize a raw atom reference to canonical `"N-M"` form.
///
/// Accepts `"5-2"`, legacy `"5.2"`, `"5_2"`, and bare `"2"` (article taken
/// from `article_id`). Leading zeros are dropped. Returns `None` when the
/// input is not a one- or two-part numeric reference.
pub fn normalize_atom_id(raw: &str, article_id: u32) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parts: Vec<&str> = trimmed
        .split(['-', '.', '_'])
        .map(str::trim)
        .collect();

    match parts.as_slice() {
        [atom] => {
            let atom: u32 = atom.parse().ok()?;
            Some(format!("{article_id}-{atom}"))
        }
        [article, atom] => {
            let article: u32 = article.parse().ok()?;
            let atom: u32 = atom.parse().ok()?;
            Some(format!("{article}-{atom}"))
        }
        _ => None,
    }
}

/// Article prefix of a canonical atom id.
pub fn atom_article(canonical: &str) -> Option<u32> {
    canonical.split('-').next()?.parse().ok()
}

/// Numeric atom suffix of a canonical atom id (`"5-12"` → 12).
pub fn atom_number(canonical: &str) -> Option<u32> {
    canonical.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::bundled().unwrap()
    }

    #[test]
    fn fingerprint_tracks_reference_text() {
        let a = Taxonomy::from_json(BUNDLED_TAXONOMY).unwrap();
        let edited = BUNDLED_TAXONOMY.replacen("\"title\": \"", "\"title\": \"Revised ", 1);
        let b = Taxonomy::from_json(&edited).unwrap();
        assert_eq!(a.fingerprint(), taxonomy().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn bundled_taxonomy_loads_sorted() {
        let tax = taxonomy();
        let ids: Vec<u32> = tax.articles().iter().map(|a| a.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert!(tax.article(5).is_some());
    }

    #[test]
    fn scannable_excludes_admin_and_out_of_scope() {
        let tax = taxonomy();
        let scannable = tax.scannable_article_ids();
        assert!(!scannable.contains(&1), "admin-only article must be excluded");
        assert!(!scannable.contains(&26), "out-of-scope article must be excluded");
        assert!(scannable.contains(&5));
        assert!(tax.is_out_of_scope(26));
    }

    #[test]
    fn normalize_accepts_canonical_legacy_and_bare() {
        assert_eq!(normalize_atom_id("5-2", 5).as_deref(), Some("5-2"));
        assert_eq!(normalize_atom_id("5.2", 5).as_deref(), Some("5-2"));
        assert_eq!(normalize_atom_id(" 2 ", 5).as_deref(), Some("5-2"));
        assert_eq!(normalize_atom_id("05-02", 9).as_deref(), Some("5-2"));
        assert_eq!(normalize_atom_id("abc", 5), None);
        assert_eq!(normalize_atom_id("5.2.1", 5), None);
    }

    #[test]
    fn atom_validity_rules() {
        let tax = taxonomy();
        assert!(tax.is_valid_atom(5, None));
        assert!(tax.is_valid_atom(5, Some("")));
        assert!(tax.is_valid_atom(5, Some("5.2")));
        assert!(tax.is_valid_atom(5, Some("2")));
        assert!(!tax.is_valid_atom(5, Some("99-1")));
        assert!(!tax.is_valid_atom(5, Some("5-99")));
    }

    #[test]
    fn article_without_atoms_accepts_own_prefix() {
        let tax = taxonomy();
        assert!(tax.article(8).unwrap().atoms.is_empty());
        assert!(tax.is_valid_atom(8, None));
        assert!(tax.is_valid_atom(8, Some("8-3")));
        assert!(!tax.is_valid_atom(8, Some("5-1")));
    }

    #[test]
    fn duplicate_article_rejected() {
        let json = r#"{"articles": [{"id": 1, "title": "a"}, {"id": 1, "title": "b"}]}"#;
        assert!(matches!(
            Taxonomy::from_json(json),
            Err(TaxonomyError::DuplicateArticle(1))
        ));
    }

    #[test]
    fn legacy_catalog_atoms_are_canonicalized() {
        let json = r#"{"articles": [{"id": 3, "title": "x", "atoms": [{"id": "3.1", "title": "y"}]}]}"#;
        let tax = Taxonomy::from_json(json).unwrap();
        assert!(tax.article(3).unwrap().has_atom("3-1"));
    }

    #[test]
    fn reference_text_lists_atoms() {
        let tax = taxonomy();
        let text = tax.reference_text(&[5]);
        assert!(text.starts_with("Article 5:"));
        assert!(text.contains("5-2"));
    }

    #[test]
    fn atom_parts() {
        assert_eq!(atom_article("5-12"), Some(5));
        assert_eq!(atom_number("5-12"), Some(12));
    }
}
