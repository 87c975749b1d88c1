//! Markdown and JSON report generation.
//!
//! This module renders a computed or stored insights result for humans
//! (Markdown) or for other tools (JSON).

use crate::models::{InsightsResult, Report, ReportMetadata};
use anyhow::{Context, Result};
use std::path::Path;

/// Width of the longest bar in the hourly histogram.
const HISTOGRAM_WIDTH: u64 = 40;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# PostInsights Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata, &report.insights));
    output.push_str(&generate_summary_section(&report.insights));
    output.push_str(&generate_ranking_section(
        "Top Authors",
        "Author",
        &report.insights.top_authors,
    ));
    output.push_str(&generate_hourly_section(&report.insights));
    output.push_str(&generate_ranking_section(
        "Top Hashtags",
        "Hashtag",
        &report.insights.top_hashtags,
    ));

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, insights: &InsightsResult) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** {}\n", metadata.dataset));
    section.push_str(&format!("- **Version:** `{}`\n", insights.version));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Source:** {}\n", metadata.source));
    if let Some(records) = metadata.records {
        section.push_str(&format!("- **Records:** {}\n", records));
    }
    if let Some(duration) = metadata.duration_seconds {
        section.push_str(&format!("- **Duration:** {:.2}s\n", duration));
    }
    section.push('\n');

    section
}

/// Generate the summary table.
fn generate_summary_section(insights: &InsightsResult) -> String {
    let mut section = String::new();
    let active_hours = insights.hourly_distribution.len();
    let peak = insights
        .hourly_distribution
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(hour, _)| format!("{:02}:00", hour))
        .unwrap_or_else(|| "-".to_string());

    section.push_str("## Summary\n\n");
    section.push_str("| Unique Posts | Average Length | Active Hours | Peak Hour |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {:.2} | {} | {} |\n\n",
        insights.unique_posts, insights.average_post_length, active_hours, peak
    ));

    section
}

/// Generate a ranking table (authors or hashtags).
fn generate_ranking_section(title: &str, column: &str, entries: &[(String, u64)]) -> String {
    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", title));

    if entries.is_empty() {
        section.push_str("Nothing to rank.\n\n");
        return section;
    }

    section.push_str(&format!("| # | {} | Posts |\n", column));
    section.push_str("|:---:|:---|:---:|\n");
    for (rank, (key, count)) in entries.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            rank + 1,
            escape_cell(key),
            count
        ));
    }
    section.push('\n');

    section
}

/// Generate the hourly distribution with a text histogram.
fn generate_hourly_section(insights: &InsightsResult) -> String {
    let mut section = String::new();

    section.push_str("## Hourly Distribution\n\n");

    let hours = &insights.hourly_distribution;
    let max = hours.values().copied().max().unwrap_or(0);
    if max == 0 {
        section.push_str("No posts.\n\n");
        return section;
    }

    section.push_str("| Hour | Posts | |\n");
    section.push_str("|:---:|:---:|:---|\n");
    for (hour, count) in hours {
        let width = (count * HISTOGRAM_WIDTH).div_ceil(max) as usize;
        section.push_str(&format!(
            "| {:02}:00 | {} | `{}` |\n",
            hour,
            count,
            "#".repeat(width)
        ));
    }
    section.push('\n');

    section
}

/// Keep table cells intact when keys contain pipes or newlines.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by PostInsights v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
