use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{EconomicDataRecord, TimePeriod};
use crate::error::EconError;
use crate::store::{EconomicStore, UpsertRow};

pub const DERIVED_SOURCE: &str = "Calculated";
const REBASE_UNIT: &str = "index (base=100)";

/// Chronologically ordered values per country.
pub type CountrySeries = BTreeMap<String, Vec<(TimePeriod, f64)>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Formula {
    /// `v(t) - v(t-1)`
    Delta { source: String },
    /// `(v(t) - v(t-1)) / v(t-1) * 100`
    PercentChange { source: String },
    /// `v(t) / v(first) * 100`
    Rebase { source: String },
    /// `rate(t) / 100 * base(t)` where both exist.
    ScaledProduct { rate: String, base: String },
    /// `value(t) * annual(year of t)`, joining sub-annual periods to their year.
    AnnualProduct { value: String, annual: String },
}

impl Formula {
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Formula::Delta { source }
            | Formula::PercentChange { source }
            | Formula::Rebase { source } => vec![source.as_str()],
            Formula::ScaledProduct { rate, base } => vec![rate.as_str(), base.as_str()],
            Formula::AnnualProduct { value, annual } => vec![value.as_str(), annual.as_str()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Computation {
    pub rows: Vec<UpsertRow>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetric {
    pub name: String,
    pub unit: String,
    pub description: String,
    pub formula: Formula,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivedRunResult {
    pub metric: String,
    pub sources: Vec<String>,
    pub records_computed: usize,
    pub records_written: usize,
    pub records_skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub dry_run: bool,
}

impl DerivedMetric {
    /// Ad-hoc rebase of any stored metric; target defaults to `<source>_cumulative_return`.
    pub fn rebase(source: &str, target: Option<&str>) -> Self {
        Self {
            name: target
                .map(str::to_string)
                .unwrap_or_else(|| format!("{source}_cumulative_return")),
            unit: REBASE_UNIT.to_string(),
            description: format!("{source} rebased to 100 at each country's first period"),
            formula: Formula::Rebase {
                source: source.to_string(),
            },
        }
    }

    pub fn compute(&self, store: &EconomicStore) -> Result<Computation, EconError> {
        let computation = match &self.formula {
            Formula::Delta { source } => {
                let (series, skipped) = load_series(store, source)?;
                with_skipped(delta(&series), skipped)
            }
            Formula::PercentChange { source } => {
                let (series, skipped) = load_series(store, source)?;
                with_skipped(percent_change(&series), skipped)
            }
            Formula::Rebase { source } => {
                let (series, skipped) = load_series(store, source)?;
                with_skipped(rebase(&series), skipped)
            }
            Formula::ScaledProduct { rate, base } => {
                let (rate_series, rate_skipped) = load_series(store, rate)?;
                let (base_series, base_skipped) = load_series(store, base)?;
                with_skipped(
                    scaled_product(&rate_series, &base_series),
                    rate_skipped + base_skipped,
                )
            }
            Formula::AnnualProduct { value, annual } => {
                let (value_series, value_skipped) = load_series(store, value)?;
                let (annual_series, annual_skipped) = load_series(store, annual)?;
                with_skipped(
                    annual_product(&value_series, &annual_series),
                    value_skipped + annual_skipped,
                )
            }
        };
        Ok(computation)
    }

    pub fn run(&self, store: &mut EconomicStore, dry_run: bool) -> Result<DerivedRunResult, EconError> {
        let computation = self.compute(store)?;
        if computation.rows.is_empty() {
            warn!(
                metric = %self.name,
                sources = ?self.formula.sources(),
                "derived.no_source_data"
            );
        }

        let counts = if dry_run || computation.rows.is_empty() {
            Default::default()
        } else {
            store.upsert(&self.name, &self.unit, DERIVED_SOURCE, &computation.rows)?
        };

        let result = DerivedRunResult {
            metric: self.name.clone(),
            sources: self.formula.sources().into_iter().map(str::to_string).collect(),
            records_computed: computation.rows.len(),
            records_written: counts.total(),
            records_skipped: computation.skipped,
            inserted: counts.inserted,
            updated: counts.updated,
            dry_run,
        };
        info!(
            metric = %result.metric,
            computed = result.records_computed,
            written = result.records_written,
            skipped = result.records_skipped,
            dry_run,
            "derived.done"
        );
        Ok(result)
    }
}

fn with_skipped(mut computation: Computation, skipped: usize) -> Computation {
    computation.skipped += skipped;
    computation
}

pub fn builtin_derived() -> Vec<DerivedMetric> {
    vec![
        DerivedMetric {
            name: "productivity_growth".to_string(),
            unit: "USD_PPP".to_string(),
            description: "Quarter-over-quarter change in GDP per capita".to_string(),
            formula: Formula::Delta {
                source: "gdp_per_capita".to_string(),
            },
        },
        DerivedMetric {
            name: "productivity_growth_pct".to_string(),
            unit: "percent".to_string(),
            description: "Quarter-over-quarter percent change in GDP per capita".to_string(),
            formula: Formula::PercentChange {
                source: "gdp_per_capita".to_string(),
            },
        },
        DerivedMetric {
            name: "gdp_per_capita_cumulative_return".to_string(),
            unit: REBASE_UNIT.to_string(),
            description: "GDP per capita rebased to 100 at each country's first quarter"
                .to_string(),
            formula: Formula::Rebase {
                source: "gdp_per_capita".to_string(),
            },
        },
        DerivedMetric {
            name: "savings_per_capita".to_string(),
            unit: "USD_PPP".to_string(),
            description: "Household savings rate applied to disposable income per capita"
                .to_string(),
            formula: Formula::ScaledProduct {
                rate: "savings_rate".to_string(),
                base: "disposable_income_per_capita".to_string(),
            },
        },
        DerivedMetric {
            name: "gdp_level".to_string(),
            unit: "USD".to_string(),
            description: "GDP per capita multiplied by the same year's population".to_string(),
            formula: Formula::AnnualProduct {
                value: "gdp_per_capita".to_string(),
                annual: "population".to_string(),
            },
        },
    ]
}

pub fn find_derived(name: &str) -> Result<DerivedMetric, EconError> {
    let catalogue = builtin_derived();
    let names = catalogue
        .iter()
        .map(|metric| metric.name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    catalogue
        .into_iter()
        .find(|metric| metric.name == name)
        .ok_or_else(|| {
            EconError::Argument(format!("unknown derived metric '{name}' (available: {names})"))
        })
}

/// Groups stored records by country, ordered by parsed period. Records whose
/// period does not parse are dropped and counted.
pub fn group_by_country(records: &[EconomicDataRecord]) -> (CountrySeries, usize) {
    let mut series = CountrySeries::new();
    let mut skipped = 0;
    for record in records {
        match record.time_period.parse::<TimePeriod>() {
            Ok(period) => series
                .entry(record.country.clone())
                .or_default()
                .push((period, record.value)),
            Err(_) => {
                warn!(
                    metric = %record.metric_name,
                    country = %record.country,
                    period = %record.time_period,
                    "derived.unparsable_period"
                );
                skipped += 1;
            }
        }
    }
    for values in series.values_mut() {
        values.sort_by(|a, b| a.0.cmp(&b.0));
    }
    (series, skipped)
}

fn load_series(store: &EconomicStore, metric: &str) -> Result<(CountrySeries, usize), EconError> {
    Ok(group_by_country(&store.series(metric)?))
}

fn row(country: &str, period: TimePeriod, value: f64) -> UpsertRow {
    UpsertRow {
        country: country.to_string(),
        time_period: period.to_string(),
        value,
    }
}

pub fn delta(series: &CountrySeries) -> Computation {
    let mut out = Computation::default();
    for (country, values) in series {
        for pair in values.windows(2) {
            let (_, previous) = pair[0];
            let (period, current) = pair[1];
            out.rows.push(row(country, period, current - previous));
        }
    }
    out
}

pub fn percent_change(series: &CountrySeries) -> Computation {
    let mut out = Computation::default();
    for (country, values) in series {
        for pair in values.windows(2) {
            let (_, previous) = pair[0];
            let (period, current) = pair[1];
            if previous == 0.0 {
                warn!(country = %country, period = %period, "derived.zero_previous_value");
                out.skipped += 1;
                continue;
            }
            out.rows
                .push(row(country, period, (current - previous) / previous * 100.0));
        }
    }
    out
}

pub fn rebase(series: &CountrySeries) -> Computation {
    let mut out = Computation::default();
    for (country, values) in series {
        let Some(&(_, base)) = values.first() else {
            continue;
        };
        if base == 0.0 {
            warn!(country = %country, "derived.zero_base_value");
            out.skipped += values.len();
            continue;
        }
        for &(period, value) in values {
            out.rows.push(row(country, period, value / base * 100.0));
        }
    }
    out
}

pub fn scaled_product(rate: &CountrySeries, base: &CountrySeries) -> Computation {
    let index = |series: &CountrySeries| -> BTreeMap<(String, TimePeriod), f64> {
        series
            .iter()
            .flat_map(|(country, values)| {
                values
                    .iter()
                    .map(move |&(period, value)| ((country.clone(), period), value))
            })
            .collect()
    };
    let rate = index(rate);
    let base = index(base);

    let mut out = Computation::default();
    for ((country, period), rate_value) in &rate {
        match base.get(&(country.clone(), *period)) {
            Some(base_value) => out
                .rows
                .push(row(country, *period, rate_value / 100.0 * base_value)),
            None => out.skipped += 1,
        }
    }
    out.skipped += base.keys().filter(|key| !rate.contains_key(*key)).count();
    out
}

/// Multiplies every point of `value` by the `annual` figure for its year.
/// Points whose country has no annual figure for that year are skipped.
pub fn annual_product(value: &CountrySeries, annual: &CountrySeries) -> Computation {
    let yearly: BTreeMap<(&str, i32), f64> = annual
        .iter()
        .flat_map(|(country, values)| {
            values.iter().filter_map(move |&(period, v)| match period {
                TimePeriod::Year(year) => Some(((country.as_str(), year), v)),
                TimePeriod::Quarter { .. } => None,
            })
        })
        .collect();

    let mut out = Computation::default();
    for (country, values) in value {
        for &(period, v) in values {
            match yearly.get(&(country.as_str(), period.year())) {
                Some(factor) => out.rows.push(row(country, period, v * factor)),
                None => out.skipped += 1,
            }
        }
    }
    out
}
