//! Verbatim evidence guard.
//!
//! A model snippet must literally exist in the source text. Three tiers are
//! tried in order: exact, strict (NFKC + whitespace collapse) and relaxed
//! (strict + punctuation stripped). Case is never folded. Each tier maps the
//! hit back to source char offsets, choosing the occurrence nearest the
//! model's own reported start. A snippet that fails all tiers is treated as
//! hallucinated.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::pipeline::text::CharIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvidenceTier {
    Exact,
    Strict,
    Relaxed,
}

/// Where a snippet was found, in source char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceSpan {
    pub tier: EvidenceTier,
    pub start: usize,
    pub end: usize,
}

/// Normalized text plus, for each normalized char, the source char range it
/// came from.
struct Normalized {
    text: String,
    origins: Vec<(usize, usize)>,
}

/// Split `source` into a base char plus its trailing combining marks, so
/// composition sees the whole cluster. Yields `(start, end, cluster)` in
/// char offsets.
fn clusters(source: &str) -> Vec<(usize, usize, String)> {
    let mut out: Vec<(usize, usize, String)> = Vec::new();
    for (pos, ch) in source.chars().enumerate() {
        match out.last_mut() {
            Some((_, end, cluster)) if is_combining_mark(ch) => {
                cluster.push(ch);
                *end = pos + 1;
            }
            _ => out.push((pos, pos + 1, ch.to_string())),
        }
    }
    out
}

fn normalize(source: &str, relaxed: bool) -> Normalized {
    let mut text = String::with_capacity(source.len());
    let mut origins = Vec::with_capacity(source.len());
    let mut last_was_space = true;

    for (start, end, cluster) in clusters(source) {
        for out in cluster.nfkc() {
            if out.is_whitespace() {
                if !last_was_space {
                    text.push(' ');
                    origins.push((start, end));
                    last_was_space = true;
                }
                continue;
            }
            if relaxed && !out.is_alphanumeric() {
                continue;
            }
            text.push(out);
            origins.push((start, end));
            last_was_space = false;
        }
    }

    // Drop a trailing collapsed space so snippets and sources trim alike.
    if text.ends_with(' ') {
        text.pop();
        origins.pop();
    }
    Normalized { text, origins }
}

fn nearest(candidates: impl Iterator<Item = (usize, usize)>, hint: usize) -> Option<(usize, usize)> {
    candidates.min_by_key(|(start, _)| (start.abs_diff(hint), *start))
}

fn locate_normalized(source: &str, snippet: &str, hint: usize, relaxed: bool) -> Option<(usize, usize)> {
    let needle = normalize(snippet, relaxed).text;
    if needle.is_empty() {
        return None;
    }
    let haystack = normalize(source, relaxed);
    let index = CharIndex::new(&haystack.text);
    let needle_chars = needle.chars().count();

    let spans = index.find_all(&needle).into_iter().filter_map(|norm_start| {
        let (start, _) = *haystack.origins.get(norm_start)?;
        let (_, end) = *haystack.origins.get(norm_start + needle_chars - 1)?;
        Some((start, end))
    });
    nearest(spans, hint)
}

/// Find `snippet` in `source`, nearest to the char offset `hint`.
pub fn locate_evidence(source: &str, snippet: &str, hint: usize) -> Option<EvidenceSpan> {
    let trimmed = snippet.trim();
    if trimmed.is_empty() {
        return None;
    }

    let index = CharIndex::new(source);
    let len = trimmed.chars().count();
    let exact = nearest(
        index.find_all(trimmed).into_iter().map(|start| (start, start + len)),
        hint,
    );
    if let Some((start, end)) = exact {
        return Some(EvidenceSpan {
            tier: EvidenceTier::Exact,
            start,
            end,
        });
    }

    if let Some((start, end)) = locate_normalized(source, trimmed, hint, false) {
        return Some(EvidenceSpan {
            tier: EvidenceTier::Strict,
            start,
            end,
        });
    }

    locate_normalized(source, trimmed, hint, true).map(|(start, end)| EvidenceSpan {
        tier: EvidenceTier::Relaxed,
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_prefers_occurrence_near_hint() {
        let source = "bad word here and bad word there";
        let span = locate_evidence(source, "bad word", 20).unwrap();
        assert_eq!(span.tier, EvidenceTier::Exact);
        assert_eq!(span.start, 18);
        assert_eq!(span.end, 26);
    }

    #[test]
    fn whitespace_differences_pass_strict_tier() {
        let source = "He said:\n   you   are\ta fool.";
        let span = locate_evidence(source, "you are a fool", 0).unwrap();
        assert_eq!(span.tier, EvidenceTier::Strict);
        assert_eq!(&source[12..], "you   are\ta fool.");
        assert_eq!(span.start, 12);
        assert_eq!(span.end, 28);
    }

    #[test]
    fn compatibility_forms_pass_strict_tier() {
        // Fullwidth letters normalize under NFKC.
        let source = "label ＡＢＣ here";
        let span = locate_evidence(source, "ABC", 0).unwrap();
        assert_eq!(span.tier, EvidenceTier::Strict);
        assert_eq!((span.start, span.end), (6, 9));
    }

    #[test]
    fn punctuation_differences_pass_relaxed_tier() {
        let source = "Well, don't do that!";
        let span = locate_evidence(source, "Well dont do that", 0).unwrap();
        assert_eq!(span.tier, EvidenceTier::Relaxed);
        assert_eq!(span.start, 0);
    }

    #[test]
    fn invented_evidence_is_rejected() {
        assert!(locate_evidence("The hero saves the day.", "the villain wins", 0).is_none());
        assert!(locate_evidence("text", "   ", 0).is_none());
        assert!(locate_evidence("text", "!!!", 0).is_none());
    }

    #[test]
    fn normalizers_collapse_and_strip() {
        assert_eq!(normalize("  a \n\n b  ", false).text, "a b");
        assert_eq!(normalize("Hello, World!", true).text, "Hello World");
    }

    #[test]
    fn case_changed_snippet_is_rejected() {
        let source = "Then he said: you are a fool, and left.";
        assert!(locate_evidence(source, "YOU ARE A FOOL", 0).is_none());
        assert!(locate_evidence(source, "You are a fool", 0).is_none());
    }

    #[test]
    fn decomposed_latin_matches_precomposed_snippet() {
        let source = "Il a dit cafe\u{301} noir ici.";
        let span = locate_evidence(source, "caf\u{e9} noir", 9).unwrap();
        assert_eq!(span.tier, EvidenceTier::Strict);
        // The span covers the combining accent too.
        assert_eq!((span.start, span.end), (9, 19));
    }

    #[test]
    fn precomposed_source_matches_decomposed_snippet() {
        let source = "Il a dit caf\u{e9} noir ici.";
        let span = locate_evidence(source, "cafe\u{301} noir", 9).unwrap();
        assert_eq!(span.tier, EvidenceTier::Strict);
        assert_eq!((span.start, span.end), (9, 18));
    }

    #[test]
    fn decomposed_arabic_matches_precomposed_snippet() {
        // Alef + hamza above composes to U+0623.
        let source = "\u{642}\u{627}\u{644} \u{627}\u{654}\u{62D}\u{645}\u{62F} \u{647}\u{646}\u{627}";
        let snippet = "\u{623}\u{62D}\u{645}\u{62F}";
        let span = locate_evidence(source, snippet, 4).unwrap();
        assert_eq!(span.tier, EvidenceTier::Strict);
        assert_eq!((span.start, span.end), (4, 9));
    }

    #[test]
    fn leading_combining_mark_stands_alone() {
        let norm = normalize("\u{301}ab", false);
        assert_eq!(norm.origins.len(), norm.text.chars().count());
        assert_eq!(norm.origins[0], (0, 1));
    }
}
