use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::client::OecdClient;
use crate::config::{LatestAnchor, Settings};
use crate::derived::{self, DerivedMetric, DerivedRunResult};
use crate::domain::{Frequency, StatusFilter};
use crate::error::EconError;
use crate::fetcher::{
    BackfillRequest, BackfillSummary, FetchRequest, FetchSummary, Fetcher, PeriodSelection,
};
use crate::query::PeriodRange;
use crate::registry::DatasetRegistry;
use crate::store::{CountryInfo, EconomicStore, MetricInfo, StoreStats};

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
    pub filter: StatusFilter,
    pub batch_size: Option<usize>,
    pub min_countries: Option<usize>,
}

/// One named dataset, or every configured one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetTarget {
    Named(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeriveTarget {
    Named(String),
    All,
    Rebase { source: String, target: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetFailure {
    pub dataset: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub datasets: Vec<FetchSummary>,
    pub failures: Vec<DatasetFailure>,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.datasets.iter().all(FetchSummary::is_success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub datasets: Vec<BackfillSummary>,
    pub failures: Vec<DatasetFailure>,
}

impl BackfillReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.datasets.iter().all(BackfillSummary::is_success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeriveReport {
    pub metrics: Vec<DerivedRunResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub metric_name: String,
    pub unit: String,
    pub frequency: Frequency,
    pub countries: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResult {
    pub metrics: Vec<MetricInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountriesResult {
    pub metric: Option<String>,
    pub countries: Vec<CountryInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitDbResult {
    pub initialized: bool,
    pub total_records: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the log.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct App<C: OecdClient> {
    store: EconomicStore,
    registry: DatasetRegistry,
    client: C,
    base_url: String,
    batch_size: usize,
    latest_anchor: LatestAnchor,
}

impl<C: OecdClient> App<C> {
    pub fn new(store: EconomicStore, settings: &Settings, client: C) -> Self {
        Self {
            store,
            registry: settings.registry(),
            client,
            base_url: settings.base_url.clone(),
            batch_size: settings.batch_size,
            latest_anchor: settings.latest_anchor,
        }
    }

    pub fn list_configs(&self) -> ListResult {
        ListResult {
            datasets: self
                .registry
                .iter()
                .map(|config| ListEntry {
                    name: config.name.clone(),
                    metric_name: config.metric_name.clone(),
                    unit: config.unit.clone(),
                    frequency: config.frequency,
                    countries: config.countries.len(),
                    description: config.description.clone(),
                })
                .collect(),
        }
    }

    pub fn fetch(
        &mut self,
        target: &DatasetTarget,
        period: PeriodSelection,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchReport, EconError> {
        let fetcher = Fetcher::new(&self.registry, &self.client, self.base_url.clone())
            .with_batch_size(options.batch_size.unwrap_or(self.batch_size))
            .with_latest_anchor(self.latest_anchor);

        let mut report = FetchReport {
            datasets: Vec::new(),
            failures: Vec::new(),
        };
        for dataset in self.target_names(target) {
            let request = FetchRequest {
                dataset: dataset.clone(),
                period,
                dry_run: options.dry_run,
                filter: options.filter.clone(),
                min_countries: options.min_countries,
            };
            match fetcher.fetch_and_upsert(&mut self.store, &request, sink) {
                Ok(summary) => report.datasets.push(summary),
                Err(err) if isolate(target, &err) => {
                    warn!(dataset = %dataset, error = %err, "fetch.dataset_failed");
                    report.failures.push(DatasetFailure {
                        dataset,
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    pub fn backfill(
        &mut self,
        target: &DatasetTarget,
        range: PeriodRange,
        batch_years: u32,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BackfillReport, EconError> {
        let fetcher = Fetcher::new(&self.registry, &self.client, self.base_url.clone())
            .with_batch_size(options.batch_size.unwrap_or(self.batch_size))
            .with_latest_anchor(self.latest_anchor);

        let mut report = BackfillReport {
            datasets: Vec::new(),
            failures: Vec::new(),
        };
        for dataset in self.target_names(target) {
            let request = BackfillRequest {
                dataset: dataset.clone(),
                range,
                batch_years,
                dry_run: options.dry_run,
                filter: options.filter.clone(),
                min_countries: options.min_countries,
            };
            match fetcher.backfill(&mut self.store, &request, sink) {
                Ok(summary) => report.datasets.push(summary),
                Err(err) if isolate(target, &err) => {
                    warn!(dataset = %dataset, error = %err, "backfill.dataset_failed");
                    report.failures.push(DatasetFailure {
                        dataset,
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    pub fn derive(
        &mut self,
        target: &DeriveTarget,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DeriveReport, EconError> {
        let metrics: Vec<DerivedMetric> = match target {
            DeriveTarget::Named(name) => vec![derived::find_derived(name)?],
            DeriveTarget::All => derived::builtin_derived(),
            DeriveTarget::Rebase { source, target } => {
                vec![DerivedMetric::rebase(source, target.as_deref())]
            }
        };

        let mut results = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Derive; {} from {}",
                    metric.name,
                    metric.formula.sources().join(", ")
                ),
                elapsed: None,
            });
            results.push(metric.run(&mut self.store, dry_run)?);
        }
        Ok(DeriveReport { metrics: results })
    }

    pub fn metrics(&self) -> Result<MetricsResult, EconError> {
        Ok(MetricsResult {
            metrics: self.store.metrics()?,
        })
    }

    pub fn countries(&self, metric: Option<&str>) -> Result<CountriesResult, EconError> {
        Ok(CountriesResult {
            metric: metric.map(str::to_string),
            countries: self.store.countries(metric)?,
        })
    }

    pub fn stats(&self) -> Result<StoreStats, EconError> {
        self.store.stats()
    }

    /// Opening the store already created the schema; this reports on it.
    pub fn init_db(&self, sink: &dyn ProgressSink) -> Result<InitDbResult, EconError> {
        sink.event(ProgressEvent {
            message: "phase=Store; schema and indexes ready".to_string(),
            elapsed: None,
        });
        Ok(InitDbResult {
            initialized: true,
            total_records: self.store.stats()?.total_records,
        })
    }

    fn target_names(&self, target: &DatasetTarget) -> Vec<String> {
        match target {
            DatasetTarget::Named(name) => vec![name.clone()],
            DatasetTarget::All => self.registry.names(),
        }
    }
}

/// With `--all`, a dataset that cannot even be attempted is reported and
/// skipped; a single named dataset fails the whole run.
fn isolate(target: &DatasetTarget, err: &EconError) -> bool {
    *target == DatasetTarget::All
        && matches!(
            err,
            EconError::Configuration(_)
                | EconError::UnknownDataset { .. }
                | EconError::Argument(_)
                | EconError::Schema(_)
        )
}
