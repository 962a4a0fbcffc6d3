//! CLI output formatting.
//!
//! Every command prints an entity-first listing: a header line naming the
//! site, job, or page, then indented context lines. Each `format_*` function
//! is pure and returns the lines; `print_*` wrappers write them to stdout.
//! Pipeline diagnostics go through `tracing` on stderr instead.
//!
//! # Output Format
//!
//! ## Status
//!
//! ```text
//! 001 Bet Guide [deployed]
//!     Domain: bets.example
//!     Pages: 12/14 generated, 1 directive pending
//!     Built: v7 at 2024-05-02 10:14 UTC (needs rebuild)
//!     Live: v6 (retained v7, v6, v5), TLS
//!     Job: 3b1f… running since 2024-05-02 10:20 UTC
//! ```
//!
//! ## Job
//!
//! ```text
//! Job 3b1f0c6e-… build for site 1
//!     State: running (4/9)
//!     Cause: …
//! ```
//!
//! ## History
//!
//! ```text
//! Page 3 Alpha Review
//!     v2 generated 2024-05-01 09:00 UTC, replaced 2024-05-02 10:14 UTC
//!         Directive: mention the new app
//! ```

use crate::jobs::JobRecord;
use crate::status::SiteSummary;
use crate::trigger::TickReport;
use crate::types::{ContentVersion, Page, Timestamp};

/// Format a 1-based index as 3-digit zero-padded.
fn format_index(pos: u32) -> String {
    format!("{:0>3}", pos)
}

/// 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn format_time(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Truncate to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn version_list(versions: &[u32]) -> String {
    versions
        .iter()
        .map(|v| format!("v{v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Status
// ============================================================================

pub fn format_site_summary(summary: &SiteSummary) -> Vec<String> {
    let site = &summary.site;
    let mut lines = vec![format!(
        "{} {} [{}]",
        format_index(site.id.0),
        site.name,
        site.status
    )];
    let ctx = indent(1);

    lines.push(format!(
        "{ctx}Domain: {}",
        site.domain.as_deref().unwrap_or("(none)")
    ));

    let mut pages = format!(
        "{ctx}Pages: {}/{} generated",
        summary.pages_generated, summary.pages_total
    );
    if summary.pending_directives > 0 {
        pages.push_str(&format!(
            ", {} pending",
            plural(summary.pending_directives, "directive", "directives")
        ));
    }
    lines.push(pages);

    match (site.last_built_version, &site.built_at) {
        (Some(v), Some(at)) => {
            let stale = if summary.needs_rebuild {
                " (needs rebuild)"
            } else {
                ""
            };
            lines.push(format!("{ctx}Built: v{v} at {}{stale}", format_time(at)));
        }
        _ => lines.push(format!("{ctx}Built: never")),
    }

    if let Some(live) = summary.remote.alias_target {
        let tls = if summary.remote.tls_provisioned {
            ", TLS"
        } else {
            ""
        };
        lines.push(format!(
            "{ctx}Live: v{live} (retained {}){tls}",
            version_list(&summary.remote.retained_versions)
        ));
    }

    if let Some(job) = &summary.active_job {
        lines.push(format!(
            "{ctx}Job: {} running since {}",
            job.job_id,
            format_time(&job.acquired_at)
        ));
    }
    if let Some(cause) = &site.failure {
        lines.push(format!("{ctx}Failure: {}", truncate(cause, 160)));
    }
    lines
}

pub fn format_status(summaries: &[SiteSummary]) -> Vec<String> {
    if summaries.is_empty() {
        return vec!["No sites".to_string()];
    }
    summaries.iter().flat_map(format_site_summary).collect()
}

pub fn print_status(summaries: &[SiteSummary]) {
    print_lines(&format_status(summaries));
}

// ============================================================================
// Jobs
// ============================================================================

pub fn format_job(record: &JobRecord) -> Vec<String> {
    let ctx = indent(1);
    let mut lines = vec![format!(
        "Job {} {} for site {}",
        record.id, record.stage, record.site_id
    )];
    let progress = if record.total_units > 0 {
        format!(" ({}/{})", record.completed_units, record.total_units)
    } else {
        String::new()
    };
    lines.push(format!("{ctx}State: {}{progress}", record.state));
    if record.cancel_requested && !record.state.is_terminal() {
        lines.push(format!("{ctx}Cancellation requested"));
    }
    if let Some(at) = &record.finished_at {
        lines.push(format!("{ctx}Finished: {}", format_time(at)));
    }
    if let Some(cause) = &record.cause {
        lines.push(format!("{ctx}Cause: {cause}"));
    }
    lines
}

pub fn print_job(record: &JobRecord) {
    print_lines(&format_job(record));
}

// ============================================================================
// History
// ============================================================================

pub fn format_history(page: &Page, entries: &[ContentVersion]) -> Vec<String> {
    let mut lines = vec![format!("Page {} {}", page.id, page.title)];
    if entries.is_empty() {
        lines.push(format!("{}No earlier versions", indent(1)));
        return lines;
    }
    for entry in entries {
        let generated = entry
            .generated_at
            .as_ref()
            .map(format_time)
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!(
            "{}v{} generated {}, replaced {}",
            indent(1),
            entry.version,
            generated,
            format_time(&entry.recorded_at)
        ));
        if let Some(directive) = &entry.directive {
            lines.push(format!(
                "{}Directive: {}",
                indent(2),
                truncate(directive, 120)
            ));
        }
    }
    lines
}

pub fn print_history(page: &Page, entries: &[ContentVersion]) {
    print_lines(&format_history(page, entries));
}

// ============================================================================
// Tick
// ============================================================================

pub fn format_tick(reports: &[TickReport]) -> Vec<String> {
    reports
        .iter()
        .map(|r| {
            let steps = if r.steps.is_empty() {
                "nothing to do".to_string()
            } else {
                r.steps
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!("{} {steps}", format_index(r.site.0))
        })
        .collect()
}

pub fn print_tick(reports: &[TickReport]) {
    print_lines(&format_tick(reports));
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
