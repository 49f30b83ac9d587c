use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::client::OecdClient;
use crate::config::LatestAnchor;
use crate::domain::{Observation, StatusFilter, TimePeriod};
use crate::error::EconError;
use crate::parser::{self, CompletenessReport, ParseOutcome, StatusBreakdown};
use crate::query::{BatchRequest, DEFAULT_BATCH_SIZE, PeriodRange, QueryBuilder};
use crate::registry::{DatasetConfig, DatasetRegistry};
use crate::store::{EconomicStore, UpsertCounts, UpsertRow};

/// Which periods a fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSelection {
    Range(PeriodRange),
    Latest(usize),
}

impl PeriodSelection {
    /// Exactly one of `latest` or the `start`/`end` pair must be given.
    pub fn from_args(
        start: Option<&str>,
        end: Option<&str>,
        latest: Option<usize>,
    ) -> Result<Self, EconError> {
        match (start, end, latest) {
            (None, None, Some(count)) => Ok(PeriodSelection::Latest(count)),
            (Some(start), Some(end), None) => Ok(PeriodSelection::Range(PeriodRange::parse(
                start, end,
            )?)),
            (_, _, Some(_)) => Err(EconError::Argument(
                "--latest cannot be combined with --start/--end".to_string(),
            )),
            (Some(_), None, None) | (None, Some(_), None) => Err(EconError::Argument(
                "--start and --end must be given together".to_string(),
            )),
            (None, None, None) => Err(EconError::Argument(
                "either --start and --end, or --latest N, is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub dataset: String,
    pub period: PeriodSelection,
    pub dry_run: bool,
    pub filter: StatusFilter,
    /// Drop periods reported by fewer countries than this.
    pub min_countries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Fetched { points: usize, malformed: usize },
    Failed { status: Option<u16>, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub index: usize,
    pub countries: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub dataset: String,
    pub metric: String,
    pub range: PeriodRange,
    pub total_points: usize,
    pub succeeded_batches: usize,
    pub failed_batches: usize,
    pub malformed_rows: usize,
    pub duplicate_rows: usize,
    pub completeness: Option<CompletenessReport>,
    pub inserted: usize,
    pub updated: usize,
    pub dry_run: bool,
    pub status_breakdown: StatusBreakdown,
    pub batches: Vec<BatchReport>,
}

impl FetchSummary {
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0
    }
}

#[derive(Default)]
struct BatchAccumulator {
    observations: Vec<Observation>,
    breakdown: StatusBreakdown,
    malformed: usize,
    succeeded: usize,
    failed: usize,
    reports: Vec<BatchReport>,
}

impl BatchAccumulator {
    fn record(&mut self, batch: &BatchRequest, result: Result<ParseOutcome, EconError>) {
        let outcome = match result {
            Ok(parsed) => {
                self.succeeded += 1;
                self.malformed += parsed.malformed;
                self.breakdown.merge(&parsed.breakdown);
                let outcome = BatchOutcome::Fetched {
                    points: parsed.observations.len(),
                    malformed: parsed.malformed,
                };
                self.observations.extend(parsed.observations);
                outcome
            }
            Err(err) => {
                self.failed += 1;
                let status = match &err {
                    EconError::Fetch { status, .. } => *status,
                    _ => None,
                };
                BatchOutcome::Failed {
                    status,
                    message: err.to_string(),
                }
            }
        };
        self.reports.push(BatchReport {
            index: batch.index,
            countries: batch.countries.len(),
            outcome,
        });
    }
}

#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub dataset: String,
    pub range: PeriodRange,
    pub batch_years: u32,
    pub dry_run: bool,
    pub filter: StatusFilter,
    pub min_countries: Option<usize>,
}

/// Per-run knobs shared by plain fetches and backfill windows.
struct RunOptions<'r> {
    dry_run: bool,
    filter: &'r StatusFilter,
    min_countries: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub dataset: String,
    pub range: PeriodRange,
    pub total_points: usize,
    pub windows: Vec<FetchSummary>,
}

impl BackfillSummary {
    pub fn is_success(&self) -> bool {
        self.windows.iter().all(FetchSummary::is_success)
    }
}

/// Runs a dataset's batches in order and folds each outcome into one summary.
pub struct Fetcher<'a, C: OecdClient> {
    registry: &'a DatasetRegistry,
    client: &'a C,
    queries: QueryBuilder,
    batch_size: usize,
    latest_anchor: LatestAnchor,
    today: NaiveDate,
}

impl<'a, C: OecdClient> Fetcher<'a, C> {
    pub fn new(registry: &'a DatasetRegistry, client: &'a C, base_url: impl Into<String>) -> Self {
        Self {
            registry,
            client,
            queries: QueryBuilder::new(base_url),
            batch_size: DEFAULT_BATCH_SIZE,
            latest_anchor: LatestAnchor::Calendar,
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_latest_anchor(mut self, anchor: LatestAnchor) -> Self {
        self.latest_anchor = anchor;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn fetch_and_upsert(
        &self,
        store: &mut EconomicStore,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSummary, EconError> {
        let config = self.registry.get(&request.dataset)?;
        config.validate()?;
        phase(
            sink,
            format!("phase=Configured; dataset {} ({})", config.name, request.filter.describe()),
        );
        let range = self.resolve_range(config, &request.period, store)?;
        let options = RunOptions {
            dry_run: request.dry_run,
            filter: &request.filter,
            min_countries: request.min_countries,
        };
        self.fetch_range(store, config, range, &options, sink)
    }

    pub fn backfill(
        &self,
        store: &mut EconomicStore,
        request: &BackfillRequest,
        sink: &dyn ProgressSink,
    ) -> Result<BackfillSummary, EconError> {
        let config = self.registry.get(&request.dataset)?;
        config.validate()?;
        let windows = request.range.split_years(request.batch_years)?;
        info!(
            dataset = %config.name,
            start = %request.range.start,
            end = %request.range.end,
            windows = windows.len(),
            "backfill.start"
        );

        let options = RunOptions {
            dry_run: request.dry_run,
            filter: &request.filter,
            min_countries: request.min_countries,
        };
        let mut summaries = Vec::with_capacity(windows.len());
        for (i, window) in windows.iter().enumerate() {
            phase(
                sink,
                format!(
                    "phase=Backfill; window {}/{} {}..{}",
                    i + 1,
                    windows.len(),
                    window.start,
                    window.end
                ),
            );
            summaries.push(self.fetch_range(store, config, *window, &options, sink)?);
        }

        let summary = BackfillSummary {
            dataset: config.name.clone(),
            range: request.range,
            total_points: summaries.iter().map(|s| s.total_points).sum(),
            windows: summaries,
        };
        info!(
            dataset = %summary.dataset,
            total_points = summary.total_points,
            success = summary.is_success(),
            "backfill.done"
        );
        Ok(summary)
    }

    pub fn resolve_range(
        &self,
        config: &DatasetConfig,
        period: &PeriodSelection,
        store: &EconomicStore,
    ) -> Result<PeriodRange, EconError> {
        let count = match period {
            PeriodSelection::Range(range) => return Ok(*range),
            PeriodSelection::Latest(count) => *count,
        };
        let anchor = match self.latest_anchor {
            LatestAnchor::Calendar => TimePeriod::containing(self.today, config.frequency),
            LatestAnchor::Storage => {
                latest_stored_period(store, config)?.ok_or_else(|| {
                    EconError::Argument(format!(
                        "no stored '{}' data to anchor --latest {count} on",
                        config.metric_name
                    ))
                })?
            }
        };
        info!(
            dataset = %config.name,
            anchor = ?self.latest_anchor,
            anchor_period = %anchor,
            count,
            "fetch.latest_window"
        );
        PeriodRange::latest(anchor, count)
    }

    fn fetch_range(
        &self,
        store: &mut EconomicStore,
        config: &DatasetConfig,
        range: PeriodRange,
        options: &RunOptions<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSummary, EconError> {
        let dry_run = options.dry_run;
        let started = Instant::now();
        let batches = self.queries.build(config, &range, self.batch_size)?;
        phase(
            sink,
            format!(
                "phase=BuildingUrls; {} countries in {} batches, {}..{}",
                config.countries.len(),
                batches.len(),
                range.start,
                range.end
            ),
        );

        let mut acc = BatchAccumulator::default();
        for batch in &batches {
            let result = self.run_batch(config, batch, options.filter, sink);
            if let Err(err) = &result {
                error!(
                    dataset = %config.name,
                    batch = batch.index,
                    total = batch.total,
                    error = %err,
                    "fetch.batch_failed"
                );
                phase(
                    sink,
                    format!("phase=FailedBatch; batch {}/{}: {err}", batch.index, batch.total),
                );
            }
            acc.record(batch, result);
        }

        phase(
            sink,
            format!(
                "phase=Aggregating; {} points from {}/{} batches",
                acc.observations.len(),
                acc.succeeded,
                batches.len()
            ),
        );
        let duplicate_rows = parser::dedupe_observations(&mut acc.observations);
        if duplicate_rows > 0 {
            warn!(
                dataset = %config.name,
                duplicates = duplicate_rows,
                "fetch.duplicate_keys"
            );
        }
        let completeness = options
            .min_countries
            .map(|min| parser::drop_incomplete_periods(&mut acc.observations, min));
        log_data_summary(&config.name, &acc.observations);
        if !acc.breakdown.is_empty() {
            parser::log_breakdown(&acc.breakdown);
        }

        let counts = if dry_run {
            phase(sink, "phase=DryRunDone; nothing written".to_string());
            UpsertCounts::default()
        } else if acc.observations.is_empty() {
            warn!(dataset = %config.name, "fetch.no_data");
            phase(sink, "phase=Done; no data to store".to_string());
            UpsertCounts::default()
        } else {
            phase(
                sink,
                format!(
                    "phase=Persisting; {} points as '{}'",
                    acc.observations.len(),
                    config.metric_name
                ),
            );
            let rows: Vec<UpsertRow> = acc
                .observations
                .iter()
                .map(|obs| UpsertRow {
                    country: obs.country.clone(),
                    time_period: obs.time_period.to_string(),
                    value: obs.value,
                })
                .collect();
            let counts = store.upsert(&config.metric_name, &config.unit, &config.source, &rows)?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; inserted {} updated {}",
                    counts.inserted, counts.updated
                ),
                elapsed: Some(started.elapsed()),
            });
            counts
        };

        let summary = FetchSummary {
            dataset: config.name.clone(),
            metric: config.metric_name.clone(),
            range,
            total_points: acc.observations.len(),
            succeeded_batches: acc.succeeded,
            failed_batches: acc.failed,
            malformed_rows: acc.malformed,
            duplicate_rows,
            completeness,
            inserted: counts.inserted,
            updated: counts.updated,
            dry_run,
            status_breakdown: acc.breakdown,
            batches: acc.reports,
        };
        info!(
            dataset = %summary.dataset,
            total_points = summary.total_points,
            succeeded = summary.succeeded_batches,
            failed = summary.failed_batches,
            inserted = summary.inserted,
            updated = summary.updated,
            dry_run,
            "fetch.done"
        );
        Ok(summary)
    }

    fn run_batch(
        &self,
        config: &DatasetConfig,
        batch: &BatchRequest,
        filter: &StatusFilter,
        sink: &dyn ProgressSink,
    ) -> Result<ParseOutcome, EconError> {
        phase(
            sink,
            format!(
                "phase=Fetching; batch {}/{} ({} countries)",
                batch.index,
                batch.total,
                batch.countries.len()
            ),
        );
        let body = self.client.fetch_csv(&batch.url)?;
        phase(
            sink,
            format!("phase=Parsing; batch {}/{}", batch.index, batch.total),
        );
        parser::parse_csv(&body, &config.metric_name, &config.columns, filter)
    }
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

fn latest_stored_period(
    store: &EconomicStore,
    config: &DatasetConfig,
) -> Result<Option<TimePeriod>, EconError> {
    Ok(store
        .metric_periods(&config.metric_name)?
        .iter()
        .filter_map(|raw| raw.parse::<TimePeriod>().ok())
        .filter(|period| period.frequency() == config.frequency)
        .max())
}

fn log_data_summary(dataset: &str, observations: &[Observation]) {
    let summary = parser::summarize(observations);
    let Some((first, last)) = summary.period_range else {
        return;
    };
    let (min, max) = summary.value_range.unwrap_or_default();
    info!(
        dataset,
        points = summary.total_points,
        countries = summary.unique_countries,
        periods = summary.unique_periods,
        first = %first,
        last = %last,
        min,
        max,
        "fetch.data_summary"
    );
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn period_selection_requires_one_form() {
        assert_matches!(
            PeriodSelection::from_args(None, None, Some(4)),
            Ok(PeriodSelection::Latest(4))
        );
        assert_matches!(
            PeriodSelection::from_args(Some("2024-Q1"), Some("2024-Q4"), None),
            Ok(PeriodSelection::Range(_))
        );
        assert_matches!(
            PeriodSelection::from_args(None, None, None),
            Err(EconError::Argument(_))
        );
        assert_matches!(
            PeriodSelection::from_args(Some("2024-Q1"), None, None),
            Err(EconError::Argument(_))
        );
        assert_matches!(
            PeriodSelection::from_args(Some("2024-Q1"), Some("2024-Q4"), Some(2)),
            Err(EconError::Argument(_))
        );
    }

    #[test]
    fn failed_batch_keeps_http_status() {
        let mut acc = BatchAccumulator::default();
        let batch = BatchRequest {
            index: 1,
            total: 1,
            countries: vec!["AUS".to_string()],
            url: "http://localhost/".to_string(),
        };
        acc.record(&batch, Err(EconError::fetch(Some(503), "unavailable")));
        assert_eq!(acc.failed, 1);
        assert_matches!(
            acc.reports[0].outcome,
            BatchOutcome::Failed { status: Some(503), .. }
        );
    }
}
