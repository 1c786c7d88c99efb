//! Markdown rendering of a report summary.

use crate::models::{ArticleSummary, Finding, ReportSummary};

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn quote(snippet: &str) -> String {
    let flat: String = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 160 {
        let cut: String = flat.chars().take(157).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

fn finding_line(finding: &Finding) -> String {
    let atom = finding
        .atom_id
        .as_deref()
        .map(|a| format!("[{a}] "))
        .unwrap_or_default();
    format!(
        "- {atom}**{}** ({}, {:.2}) chars {}-{}: \"{}\"",
        finding.title,
        finding.severity,
        finding.confidence,
        finding.start_offset,
        finding.end_offset,
        quote(&finding.evidence_snippet)
    )
}

fn checklist_row(article: &ArticleSummary) -> String {
    format!(
        "| {} | {} | {} | {} | {} | {} | {} |",
        article.article_id,
        escape_cell(&article.title),
        article.status.as_str(),
        article.counts.low,
        article.counts.medium,
        article.counts.high,
        article.counts.critical
    )
}

pub fn render_markdown(summary: &ReportSummary) -> String {
    let mut lines = Vec::<String>::new();
    lines.push(format!("# Compliance report: {}", summary.script_id));
    lines.push(String::new());
    lines.push(format!("- Version: `{}`", summary.version_id));
    lines.push(format!("- Job: `{}`", summary.job_id));
    lines.push(format!("- Taxonomy: {}", summary.taxonomy_version));
    lines.push(format!("- Generated: {}", summary.generated_at));
    lines.push(String::new());

    lines.push("## Totals".to_string());
    lines.push(String::new());
    lines.push(format!(
        "{} findings: {} critical, {} high, {} medium, {} low.",
        summary.findings_count,
        summary.totals.critical,
        summary.totals.high,
        summary.totals.medium,
        summary.totals.low
    ));
    if summary.failed_chunks > 0 || summary.degraded_chunks > 0 {
        lines.push(String::new());
        lines.push(format!(
            "> Coverage warning: {} chunk(s) failed, {} chunk(s) were judged with degraded model output.",
            summary.failed_chunks, summary.degraded_chunks
        ));
    }
    lines.push(String::new());

    lines.push("## Checklist".to_string());
    lines.push(String::new());
    lines.push("| Article | Title | Status | Low | Medium | High | Critical |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- | --- |".to_string());
    lines.extend(summary.checklist.iter().map(checklist_row));
    lines.push(String::new());

    lines.push("## Findings".to_string());
    lines.push(String::new());
    if summary.findings_by_article.is_empty() {
        lines.push("No findings.".to_string());
        lines.push(String::new());
    }
    for article in &summary.findings_by_article {
        lines.push(format!(
            "### Article {}: {} ({})",
            article.article_id,
            article.title,
            article.status.as_str()
        ));
        lines.push(String::new());
        lines.extend(article.top_findings.iter().map(finding_line));
        let shown = article.top_findings.len() as u32;
        if article.counts.total() > shown {
            lines.push(format!("- ... and {} more", article.counts.total() - shown));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
