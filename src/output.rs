use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    BackfillReport, CountriesResult, DeriveReport, FetchReport, InitDbResult, ListResult,
    MetricsResult,
};
use crate::fetcher::{BatchOutcome, FetchSummary};
use crate::store::StoreStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json { OutputMode::Json } else { OutputMode::Human }
    }

    /// Writes `value` as pretty JSON, or `render(value)` as text.
    pub fn emit<T: Serialize>(self, value: &T, render: impl Fn(&T) -> String) -> io::Result<()> {
        match self {
            OutputMode::Json => JsonOutput::print_json(value),
            OutputMode::Human => {
                let mut stdout = io::stdout();
                stdout.write_all(render(value).as_bytes())
            }
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub fn render_fetch_summary(summary: &FetchSummary) -> String {
    let mut out = String::new();
    let verdict = if summary.is_success() { "ok" } else { "FAILED" };
    let _ = writeln!(
        out,
        "{} ({}) {}..{}: {verdict}",
        summary.dataset, summary.metric, summary.range.start, summary.range.end
    );
    let _ = writeln!(
        out,
        "  batches: {} succeeded, {} failed",
        summary.succeeded_batches, summary.failed_batches
    );
    for batch in &summary.batches {
        match &batch.outcome {
            BatchOutcome::Fetched { points, malformed } => {
                let _ = writeln!(
                    out,
                    "    #{} {} countries: {points} points, {malformed} malformed",
                    batch.index, batch.countries
                );
            }
            BatchOutcome::Failed { message, .. } => {
                let _ = writeln!(
                    out,
                    "    #{} {} countries: failed: {message}",
                    batch.index, batch.countries
                );
            }
        }
    }
    let _ = writeln!(out, "  points: {}", summary.total_points);
    if summary.duplicate_rows > 0 {
        let _ = writeln!(out, "  duplicate keys collapsed: {}", summary.duplicate_rows);
    }
    if let Some(report) = &summary.completeness {
        let removed = report
            .removed_periods
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "  completeness (>= {} countries): {} points removed [{removed}]",
            report.min_countries, report.removed_points
        );
    }
    if summary.dry_run {
        let _ = writeln!(out, "  dry run: nothing written");
    } else {
        let _ = writeln!(
            out,
            "  stored: {} inserted, {} updated",
            summary.inserted, summary.updated
        );
    }
    if !summary.status_breakdown.is_empty() {
        let _ = writeln!(out, "  status breakdown:");
        for (status, tally) in summary.status_breakdown.iter() {
            let _ = writeln!(
                out,
                "    {:<2} {:<12} kept {:>6}  filtered {:>6}",
                status.code(),
                status.label(),
                tally.kept,
                tally.filtered
            );
        }
    }
    out
}

pub fn render_fetch_report(report: &FetchReport) -> String {
    let mut out = String::new();
    for summary in &report.datasets {
        out.push_str(&render_fetch_summary(summary));
    }
    for failure in &report.failures {
        let _ = writeln!(out, "{}: FAILED: {}", failure.dataset, failure.error);
    }
    out
}

pub fn render_backfill_report(report: &BackfillReport) -> String {
    let mut out = String::new();
    for backfill in &report.datasets {
        let _ = writeln!(
            out,
            "backfill {} {}..{}: {} windows, {} points",
            backfill.dataset,
            backfill.range.start,
            backfill.range.end,
            backfill.windows.len(),
            backfill.total_points
        );
        for window in &backfill.windows {
            out.push_str(&render_fetch_summary(window));
        }
    }
    for failure in &report.failures {
        let _ = writeln!(out, "{}: FAILED: {}", failure.dataset, failure.error);
    }
    out
}

pub fn render_derive_report(report: &DeriveReport) -> String {
    let mut out = String::new();
    for result in &report.metrics {
        let written = if result.dry_run {
            "dry run".to_string()
        } else {
            format!("{} written", result.records_written)
        };
        let _ = writeln!(
            out,
            "{} <- {}: {} computed, {} skipped, {written}",
            result.metric,
            result.sources.join(", "),
            result.records_computed,
            result.records_skipped
        );
    }
    out
}

pub fn render_list(result: &ListResult) -> String {
    let mut out = String::new();
    for entry in &result.datasets {
        let _ = writeln!(
            out,
            "{:<20} {:<20} {:<10} {:>3} countries  {}",
            entry.name,
            entry.metric_name,
            entry.frequency.to_string(),
            entry.countries,
            entry.description
        );
    }
    out
}

pub fn render_metrics(result: &MetricsResult) -> String {
    if result.metrics.is_empty() {
        return "no metrics stored\n".to_string();
    }
    let mut out = String::new();
    for metric in &result.metrics {
        let _ = writeln!(
            out,
            "{:<34} {:<18} {:<10} {:>7} points  {}..{}",
            metric.name,
            metric.unit.as_deref().unwrap_or("-"),
            metric.source.as_deref().unwrap_or("-"),
            metric.data_points,
            metric.earliest.as_deref().unwrap_or("?"),
            metric.latest.as_deref().unwrap_or("?")
        );
    }
    out
}

pub fn render_countries(result: &CountriesResult) -> String {
    let mut out = String::new();
    for country in &result.countries {
        let _ = writeln!(out, "{:<24} {:>7}", country.name, country.data_points);
    }
    let _ = writeln!(out, "{} countries", result.countries.len());
    out
}

pub fn render_stats(stats: &StoreStats) -> String {
    format!(
        "records:   {}\nmetrics:   {}\ncountries: {}\nperiods:   {}\nrange:     {}..{}\n",
        stats.total_records,
        stats.unique_metrics,
        stats.unique_countries,
        stats.unique_periods,
        stats.earliest.as_deref().unwrap_or("?"),
        stats.latest.as_deref().unwrap_or("?")
    )
}

pub fn render_init_db(result: &InitDbResult) -> String {
    format!("database ready ({} records)\n", result.total_records)
}
