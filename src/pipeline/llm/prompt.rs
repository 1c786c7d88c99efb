//! Prompt templates for the router, judge, and repair roles.
//!
//! Template text feeds `current_prompt_hashes()`, which is part of every
//! run key: editing a template invalidates cached chunk runs.

use crate::models::PromptHashes;
use crate::pipeline::hashing::hash_fields;
use crate::taxonomy::Taxonomy;

pub const ROUTER_SYSTEM: &str = "You are a compliance triage assistant. \
Given a passage of script text and a list of regulatory articles, identify the \
articles the passage may violate. Respond with JSON only, in the form \
{\"candidates\": [{\"article_id\": <int>, \"confidence\": <0..1>}]}. \
Return an empty list when nothing applies.";

pub const JUDGE_SYSTEM: &str = "You are a compliance judge. Examine the passage \
against the provided article and atom reference and report every violation. \
Respond with JSON only, in the form {\"findings\": [ ... ]}. Each finding has: \
article_id (int), atom_id (\"<article>-<atom>\" or null), title, description, \
severity (one of low, medium, high, critical), confidence (0..1), \
is_interpretive (bool), evidence_snippet (copied verbatim from the passage), \
start_offset and end_offset (character offsets within the passage), \
start_line and end_line (1-based, within the passage). \
Never paraphrase evidence. Return an empty list when nothing applies.";

pub const REPAIR_SYSTEM: &str = "You repair malformed JSON. Return the same content \
as a single valid JSON object that satisfies the stated schema. Do not add, remove, \
or reinterpret findings. Output JSON only.";

pub const ROUTER_USER_TEMPLATE: &str = "ARTICLES:\n{articles}\nPASSAGE:\n{text}";
const ROUTER_ARTICLE_LINE: &str = "{id}: {title}\n";

/// Offsets are given for context only; the model reports positions
/// relative to the passage.
pub const JUDGE_USER_TEMPLATE: &str =
    "REFERENCE:\n{reference}\nPASSAGE (characters {start}-{end} of the script):\n{text}";

pub const REPAIR_USER_TEMPLATE: &str = "The following output was rejected: {problem}\n\
Expected schema: {\"findings\": [{\"article_id\", \"atom_id\", \"title\", \
\"description\", \"severity\", \"confidence\", \"is_interpretive\", \
\"evidence_snippet\", \"start_offset\", \"end_offset\", \"start_line\", \"end_line\"}]}\n\
OUTPUT:\n{broken}";

/// Hashes of the templates compiled into this build, system and user
/// message together per role.
pub fn current_prompt_hashes() -> PromptHashes {
    PromptHashes {
        router: hash_fields(&[ROUTER_SYSTEM, ROUTER_USER_TEMPLATE, ROUTER_ARTICLE_LINE]),
        judge: hash_fields(&[JUDGE_SYSTEM, JUDGE_USER_TEMPLATE]),
        repair: hash_fields(&[REPAIR_SYSTEM, REPAIR_USER_TEMPLATE]),
    }
}

/// Substitute `{name}` placeholders in one pass. Inserted values are not
/// rescanned and unknown braces are kept as written.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values.iter().find_map(|(name, value)| {
            tail.strip_prefix(name)?
                .strip_prefix('}')
                .map(|after| (*value, after))
        });
        match hit {
            Some((value, after)) => {
                out.push_str(value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// User message for the router: the article list then the passage.
pub fn build_router_prompt(taxonomy: &Taxonomy, article_ids: &[u32], text: &str) -> String {
    let articles: String = article_ids
        .iter()
        .filter_map(|id| taxonomy.article(*id))
        .map(|article| {
            fill(
                ROUTER_ARTICLE_LINE,
                &[("id", &article.id.to_string()), ("title", &article.title)],
            )
        })
        .collect();
    fill(ROUTER_USER_TEMPLATE, &[("articles", &articles), ("text", text)])
}

/// User message for the judge.
pub fn build_judge_prompt(
    reference: &str,
    text: &str,
    global_start: usize,
    global_end: usize,
) -> String {
    fill(
        JUDGE_USER_TEMPLATE,
        &[
            ("reference", reference),
            ("start", &global_start.to_string()),
            ("end", &global_end.to_string()),
            ("text", text),
        ],
    )
}

pub fn build_repair_prompt(broken: &str, problem: &str) -> String {
    fill(REPAIR_USER_TEMPLATE, &[("problem", problem), ("broken", broken)])
}
