//! Report rendering. Every function here is pure.

use super::{Report, RunSummary};
use crate::evaluation::{StageStatus, TestSource};
use crate::tools::MutantStatus;
use askama::Template;
use pulldown_cmark::{html, Event, Options, Parser};
use std::fmt::Write;
use thiserror::Error;

/// Surviving mutants listed per run before the rest are summarized.
const MAX_LISTED_MUTANTS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Json,
    Markdown,
    Html,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 3] = [ReportFormat::Json, ReportFormat::Markdown, ReportFormat::Html];

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render report template: {0}")]
    Template(#[from] askama::Error),
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    title: &'a str,
    complete: bool,
    body: String,
}

pub fn render(report: &Report, format: ReportFormat) -> Result<String, RenderError> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ReportFormat::Markdown => Ok(render_markdown(report)),
        ReportFormat::Html => {
            let template = ReportTemplate {
                title: &report.title,
                complete: report.complete,
                body: markdown_to_html(&render_markdown(report)),
            };
            Ok(template.render()?)
        }
    }
}

fn markdown_to_html(s: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    // Tool output and endpoint errors end up in the body; never pass raw HTML through
    let parser = Parser::new_ext(s, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

fn percent(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1}%", v)).unwrap_or_else(|| "n/a".to_string())
}

fn signed(value: Option<f64>, unit: &str) -> String {
    value
        .map(|v| format!("{:+.1}{}", v, unit))
        .unwrap_or_else(|| "n/a".to_string())
}

fn verdict(met: Option<bool>) -> &'static str {
    match met {
        Some(true) => "met",
        Some(false) => "below",
        None => "n/a",
    }
}

/// Keep table cells on one line and free of column separators.
fn cell(text: &str) -> String {
    text.lines()
        .next()
        .unwrap_or_default()
        .replace('|', "\\|")
}

pub fn render_markdown(report: &Report) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# {}\n", report.title);

    if report.complete {
        let _ = writeln!(md, "**Status:** complete\n");
    } else {
        let unresolved: usize = report
            .runs
            .iter()
            .map(|r| {
                r.run
                    .stages()
                    .iter()
                    .filter(|s| s.status != StageStatus::Succeeded)
                    .count()
            })
            .sum();
        let _ = writeln!(
            md,
            "**Status:** INCOMPLETE ({} stage(s) did not succeed)\n",
            unresolved
        );
    }
    let _ = writeln!(md, "Generated {}\n", report.generated_at.format("%Y-%m-%d %H:%M:%S"));

    md.push_str("## Summary\n\n");
    md.push_str("| Run | Module | Language | Tests | Coverage | Mutation score | Thresholds |\n");
    md.push_str("|---|---|---|---|---|---|---|\n");
    for summary in &report.runs {
        let run = &summary.run;
        let tests = run
            .execution
            .map(|c| format!("{}/{} passed", c.passed, c.total()))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | {} | coverage {}, branches {}, mutation {} |",
            summary.label,
            run.module.id,
            run.module.language,
            tests,
            percent(summary.coverage()),
            percent(summary.mutation_score()),
            verdict(summary.thresholds.coverage_met),
            verdict(summary.thresholds.branch_met),
            verdict(summary.thresholds.mutation_met),
        );
    }
    md.push('\n');

    if let Some(comparison) = &report.comparison {
        md.push_str("## Comparison\n\n");
        md.push_str("Deltas are experimental minus baseline.\n\n");
        md.push_str("| Metric | Delta |\n|---|---|\n");
        let _ = writeln!(md, "| Line coverage | {} |", signed(comparison.coverage_delta, " pts"));
        let _ = writeln!(
            md,
            "| Mutation score | {} |",
            signed(comparison.mutation_score_delta, " pts")
        );
        let _ = writeln!(
            md,
            "| AI time | {} |",
            signed(Some(comparison.duration_delta_secs), "s")
        );
        let _ = writeln!(
            md,
            "| Efficiency gain | {} |",
            signed(comparison.efficiency_gain_delta, " pts")
        );
        md.push('\n');
    }

    for summary in &report.runs {
        render_run(&mut md, summary);
    }

    md
}

fn render_run(md: &mut String, summary: &RunSummary) {
    let run = &summary.run;
    let _ = writeln!(md, "## {}: {}\n", summary.label, run.id);
    let _ = writeln!(md, "- Module: `{}`", run.module.path.display());
    let _ = writeln!(md, "- Language: {}", run.module.language);
    let _ = writeln!(md, "- Tier: {}", run.module.tier);
    match &run.test_source {
        TestSource::Generated {
            saved_to,
            generation,
        } => {
            let _ = writeln!(
                md,
                "- Tests: generated by `{}` ({} protocol, {} attempt(s), {:.1}s)",
                generation.model,
                generation.protocol,
                generation.attempts,
                generation.latency_ms as f64 / 1000.0
            );
            if let Some(path) = saved_to {
                let _ = writeln!(md, "- Generated test saved to `{}`", path.display());
            }
        }
        TestSource::Supplied { path } => {
            let _ = writeln!(md, "- Tests: supplied `{}`", path.display());
        }
        TestSource::GenerationFailed { protocol, error } => {
            let _ = writeln!(md, "- Tests: generation failed ({} protocol): {}", protocol, error);
        }
    }
    if let (Some(manual), Some(gain)) = (summary.manual_minutes, summary.efficiency_gain) {
        let _ = writeln!(
            md,
            "- Efficiency gain: {:.1}% against {:.0} manual minute(s)",
            gain, manual
        );
    }
    md.push('\n');

    md.push_str("| Stage | Status | Duration | Detail |\n|---|---|---|---|\n");
    for record in run.stages() {
        let duration = record
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} |",
            record.stage,
            record.status,
            duration,
            cell(record.status.reason().unwrap_or_default())
        );
    }
    md.push('\n');

    if let Some(counts) = run.execution {
        let _ = writeln!(
            md,
            "Tests: {} passed, {} failed, {} errored, {} skipped\n",
            counts.passed, counts.failed, counts.errored, counts.skipped
        );
    }

    if let Some(coverage) = &run.coverage {
        let _ = write!(
            md,
            "Coverage ({}): {}/{} lines ({:.1}%)",
            coverage.tool, coverage.lines_covered, coverage.lines_total, coverage.line_coverage
        );
        if let Some(branch) = coverage.branch_coverage {
            let _ = write!(
                md,
                ", branches {:.1}% (threshold {:.1}%)",
                branch, summary.thresholds.branch_coverage_threshold
            );
        }
        let _ = writeln!(
            md,
            ", threshold {:.1}%\n",
            summary.thresholds.coverage_threshold
        );
    }

    if let Some(mutation) = &run.mutation {
        let _ = writeln!(
            md,
            "Mutation ({}): score {:.1}% ({} of {} detected; {} survived, {} timed out, {} without coverage, {} unviable), threshold {:.1}%\n",
            mutation.tool,
            mutation.score,
            mutation.detected(),
            mutation.total,
            mutation.survived,
            mutation.timed_out,
            mutation.no_coverage,
            mutation.unviable,
            summary.thresholds.mutation_threshold
        );

        let undetected: Vec<_> = mutation
            .mutants
            .iter()
            .filter(|m| matches!(m.status, MutantStatus::Survived | MutantStatus::NoCoverage))
            .collect();
        if !undetected.is_empty() {
            md.push_str("Undetected mutants:\n\n");
            for mutant in undetected.iter().take(MAX_LISTED_MUTANTS) {
                let _ = writeln!(
                    md,
                    "- #{} {} at {}: {}",
                    mutant.id,
                    mutant.status,
                    mutant.location.as_deref().unwrap_or("unknown location"),
                    mutant.description.as_deref().unwrap_or("no description")
                );
            }
            if undetected.len() > MAX_LISTED_MUTANTS {
                let _ = writeln!(md, "- ... and {} more", undetected.len() - MAX_LISTED_MUTANTS);
            }
            md.push('\n');
        }
    }

    if let Some((stage, reason, output)) = run.failed_stage() {
        let _ = writeln!(md, "### Failure in {}\n\n{}\n", stage, reason);
        if let Some(output) = output {
            // A longer fence than any backtick run in the output
            let longest = output
                .split(|c| c != '`')
                .map(str::len)
                .max()
                .unwrap_or(0);
            let fence = "`".repeat(longest.max(2) + 1);
            let _ = writeln!(md, "{}text\n{}\n{}\n", fence, output, fence);
        }
    }
}
