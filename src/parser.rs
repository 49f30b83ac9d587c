use std::collections::{BTreeMap, BTreeSet};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Observation, ObservationStatus, StatusFilter, TimePeriod};
use crate::error::EconError;
use crate::registry::{ColumnMap, standardize_country};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub kept: usize,
    pub filtered: usize,
}

/// Per-status kept/filtered counts for one or more parse calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusBreakdown {
    counts: BTreeMap<ObservationStatus, StatusTally>,
}

impl StatusBreakdown {
    pub fn record_kept(&mut self, status: &ObservationStatus) {
        self.counts.entry(status.clone()).or_default().kept += 1;
    }

    pub fn record_filtered(&mut self, status: &ObservationStatus) {
        self.counts.entry(status.clone()).or_default().filtered += 1;
    }

    pub fn get(&self, status: &ObservationStatus) -> StatusTally {
        self.counts.get(status).copied().unwrap_or_default()
    }

    pub fn merge(&mut self, other: &StatusBreakdown) {
        for (status, tally) in &other.counts {
            let entry = self.counts.entry(status.clone()).or_default();
            entry.kept += tally.kept;
            entry.filtered += tally.filtered;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObservationStatus, &StatusTally)> {
        self.counts.iter()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_filtered(&self) -> usize {
        self.counts.values().map(|tally| tally.filtered).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub observations: Vec<Observation>,
    pub breakdown: StatusBreakdown,
    pub rows_read: usize,
    pub malformed: usize,
}

struct ColumnIndex {
    country: usize,
    time_period: usize,
    value: usize,
    status: usize,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, columns: &ColumnMap) -> Result<Self, EconError> {
        let mut missing = Vec::new();
        let mut locate = |name: &str| {
            let position = headers.iter().position(|header| header == name);
            if position.is_none() {
                missing.push(name.to_string());
            }
            position.unwrap_or_default()
        };
        let index = Self {
            country: locate(&columns.country),
            time_period: locate(&columns.time_period),
            value: locate(&columns.value),
            status: locate(&columns.status),
        };
        if !missing.is_empty() {
            let available = headers.iter().take(10).collect::<Vec<_>>().join(", ");
            return Err(EconError::Schema(format!(
                "missing required columns [{}]; available: {available}",
                missing.join(", ")
            )));
        }
        Ok(index)
    }
}

/// Decodes an OECD CSV payload into observations. Rows whose status the filter
/// rejects are counted as filtered; allowed rows with missing fields or
/// non-numeric values are counted as malformed. Neither aborts the parse.
pub fn parse_csv(
    csv_text: &str,
    metric_name: &str,
    columns: &ColumnMap,
    filter: &StatusFilter,
) -> Result<ParseOutcome, EconError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| EconError::Schema(err.to_string()))?
        .clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(EconError::Schema("CSV has no header row".to_string()));
    }
    let index = ColumnIndex::resolve(&headers, columns)?;

    debug!(metric = metric_name, filter = %filter.describe(), "parse.start");

    let mut outcome = ParseOutcome::default();
    for record in reader.records() {
        outcome.rows_read += 1;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(metric = metric_name, error = %err, "parse.unreadable_row");
                outcome.malformed += 1;
                continue;
            }
        };

        let field = |i: usize| record.get(i).unwrap_or("");
        let country_raw = field(index.country);
        let period_raw = field(index.time_period);
        let value_raw = field(index.value);
        let status = ObservationStatus::from_code(field(index.status));

        // Status first: value-less `M` rows are filtered, not malformed.
        if !filter.allows(&status) {
            outcome.breakdown.record_filtered(&status);
            continue;
        }

        if country_raw.is_empty() || period_raw.is_empty() || value_raw.is_empty() {
            outcome.malformed += 1;
            continue;
        }

        let Ok(value) = value_raw.parse::<f64>() else {
            warn!(
                metric = metric_name,
                country = country_raw,
                period = period_raw,
                value = value_raw,
                "parse.non_numeric_value"
            );
            outcome.malformed += 1;
            continue;
        };
        if !value.is_finite() {
            outcome.malformed += 1;
            continue;
        }
        let Ok(time_period) = period_raw.parse::<TimePeriod>() else {
            warn!(metric = metric_name, period = period_raw, "parse.bad_period");
            outcome.malformed += 1;
            continue;
        };

        outcome.breakdown.record_kept(&status);
        outcome.observations.push(Observation {
            country: standardize_country(country_raw),
            time_period,
            value,
            status,
        });
    }

    info!(
        metric = metric_name,
        kept = outcome.observations.len(),
        rows = outcome.rows_read,
        malformed = outcome.malformed,
        filtered = outcome.breakdown.total_filtered(),
        "parse.done"
    );
    log_breakdown(&outcome.breakdown);

    Ok(outcome)
}

pub fn log_breakdown(breakdown: &StatusBreakdown) {
    for (status, tally) in breakdown.iter() {
        let marker = match (tally.kept, tally.filtered) {
            (_, 0) => "KEPT",
            (0, _) => "FILTERED",
            _ => "MIXED",
        };
        info!(
            status = %status,
            kept = tally.kept,
            filtered = tally.filtered,
            "{marker}"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSummary {
    pub total_points: usize,
    pub unique_countries: usize,
    pub unique_periods: usize,
    pub period_range: Option<(TimePeriod, TimePeriod)>,
    pub value_range: Option<(f64, f64)>,
}

pub fn summarize(observations: &[Observation]) -> DataSummary {
    let countries: BTreeSet<&str> = observations.iter().map(|o| o.country.as_str()).collect();
    let periods: BTreeSet<TimePeriod> = observations.iter().map(|o| o.time_period).collect();
    let value_range = observations.iter().map(|o| o.value).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
    });
    DataSummary {
        total_points: observations.len(),
        unique_countries: countries.len(),
        unique_periods: periods.len(),
        period_range: periods.first().copied().zip(periods.last().copied()),
        value_range,
    }
}

/// Collapses repeated `(country, period)` keys, keeping the last occurrence.
/// Returns the number of rows dropped.
pub fn dedupe_observations(observations: &mut Vec<Observation>) -> usize {
    let before = observations.len();
    let mut latest: BTreeMap<(String, TimePeriod), Observation> = BTreeMap::new();
    for obs in observations.drain(..) {
        latest.insert((obs.country.clone(), obs.time_period), obs);
    }
    observations.extend(latest.into_values());
    before - observations.len()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub min_countries: usize,
    pub removed_points: usize,
    pub removed_periods: Vec<TimePeriod>,
}

/// Drops every period reported by fewer than `min_countries` countries.
pub fn drop_incomplete_periods(
    observations: &mut Vec<Observation>,
    min_countries: usize,
) -> CompletenessReport {
    let mut per_period: BTreeMap<TimePeriod, BTreeSet<&str>> = BTreeMap::new();
    for obs in observations.iter() {
        per_period
            .entry(obs.time_period)
            .or_default()
            .insert(obs.country.as_str());
    }
    let removed_periods: Vec<TimePeriod> = per_period
        .iter()
        .filter(|(_, countries)| countries.len() < min_countries)
        .map(|(period, _)| *period)
        .collect();
    for (period, countries) in &per_period {
        let marker = if countries.len() < min_countries {
            "REMOVED"
        } else {
            "KEPT"
        };
        debug!(period = %period, countries = countries.len(), "{marker}");
    }

    let before = observations.len();
    observations.retain(|obs| !removed_periods.contains(&obs.time_period));
    let report = CompletenessReport {
        min_countries,
        removed_points: before - observations.len(),
        removed_periods,
    };
    info!(
        min_countries,
        kept = observations.len(),
        removed = report.removed_points,
        periods_removed = report.removed_periods.len(),
        "parse.completeness"
    );
    report
}
