use serde::Serialize;

use crate::domain::TimePeriod;
use crate::error::EconError;
use crate::registry::{COUNTRIES_PLACEHOLDER, DatasetConfig, FREQUENCY_PLACEHOLDER};

pub const DEFAULT_BATCH_SIZE: usize = 30;
const COUNTRY_SEPARATOR: &str = "+";
const CSV_FORMAT: &str = "csvfilewithlabels";

/// Inclusive period range, both ends at the same frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodRange {
    pub start: TimePeriod,
    pub end: TimePeriod,
}

impl PeriodRange {
    pub fn new(start: TimePeriod, end: TimePeriod) -> Result<Self, EconError> {
        if start.frequency() != end.frequency() {
            return Err(EconError::Argument(format!(
                "start {start} and end {end} use different frequencies"
            )));
        }
        if start > end {
            return Err(EconError::Argument(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, EconError> {
        Self::new(start.parse()?, end.parse()?)
    }

    /// The `count` periods ending at `anchor`.
    pub fn latest(anchor: TimePeriod, count: usize) -> Result<Self, EconError> {
        if count == 0 {
            return Err(EconError::Argument("--latest must be at least 1".to_string()));
        }
        let start = anchor.shift(1 - count as i64);
        Self::new(start, anchor)
    }

    pub fn periods(&self) -> Vec<TimePeriod> {
        let mut periods = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            periods.push(current);
            current = current.next();
        }
        periods
    }

    /// Windows of `years` years each, as used by backfills. A window's end is
    /// its start moved forward by `years`, clamped to the overall end; the
    /// next window starts one period later.
    pub fn split_years(&self, years: u32) -> Result<Vec<PeriodRange>, EconError> {
        if years == 0 {
            return Err(EconError::Argument("--batch-years must be at least 1".to_string()));
        }
        let step = i64::from(years) * self.start.frequency().periods_per_year();
        let mut windows = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            let end = current.shift(step).min(self.end);
            windows.push(PeriodRange {
                start: current,
                end,
            });
            current = end.next();
        }
        Ok(windows)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    pub index: usize,
    pub total: usize,
    pub countries: Vec<String>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    base_url: String,
}

impl QueryBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, dataset_path: &str, selection: &str, range: &PeriodRange) -> String {
        format!(
            "{}{}/{}?startPeriod={}&endPeriod={}&format={CSV_FORMAT}&dimensionAtObservation=AllDimensions",
            self.base_url, dataset_path, selection, range.start, range.end
        )
    }

    pub fn selection(config: &DatasetConfig, countries: &[String]) -> String {
        config
            .data_selection_template
            .replace(FREQUENCY_PLACEHOLDER, config.frequency.code())
            .replace(COUNTRIES_PLACEHOLDER, &countries.join(COUNTRY_SEPARATOR))
    }

    /// One URL per chunk of at most `batch_size` countries, in country-list order.
    pub fn build(
        &self,
        config: &DatasetConfig,
        range: &PeriodRange,
        batch_size: usize,
    ) -> Result<Vec<BatchRequest>, EconError> {
        config.validate()?;
        if batch_size == 0 {
            return Err(EconError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if range.start.frequency() != config.frequency {
            return Err(EconError::Argument(format!(
                "dataset '{}' is {} but the requested periods are {}",
                config.name,
                config.frequency,
                range.start.frequency()
            )));
        }

        let chunks = config.countries.chunks(batch_size);
        let total = chunks.len();
        Ok(chunks
            .enumerate()
            .map(|(i, chunk)| BatchRequest {
                index: i + 1,
                total,
                countries: chunk.to_vec(),
                url: self.build_url(&config.dataset_path, &Self::selection(config, chunk), range),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DatasetRegistry;

    #[test]
    fn url_shape() {
        let registry = DatasetRegistry::with_builtins();
        let config = registry.get("gdp_per_capita").unwrap();
        let builder = QueryBuilder::new("https://sdmx.oecd.org/public/rest/data/");
        let range = PeriodRange::parse("2024-Q1", "2025-Q3").unwrap();
        let batches = builder.build(config, &range, 2).unwrap();
        assert_eq!(
            batches[0].url,
            "https://sdmx.oecd.org/public/rest/data/OECD.SDD.NAD,DSD_NAMAIN1@DF_QNA_EXPENDITURE_CAPITA,1.1/Q..AUS+AUT........LR..?startPeriod=2024-Q1&endPeriod=2025-Q3&format=csvfilewithlabels&dimensionAtObservation=AllDimensions"
        );
    }

    #[test]
    fn latest_window_crosses_year() {
        let range = PeriodRange::latest("2025-Q1".parse().unwrap(), 3).unwrap();
        assert_eq!(range.start.to_string(), "2024-Q3");
        assert_eq!(range.end.to_string(), "2025-Q1");
    }

    #[test]
    fn reversed_range_rejected() {
        assert!(PeriodRange::parse("2025-Q1", "2024-Q1").is_err());
        assert!(PeriodRange::parse("2024", "2024-Q1").is_err());
    }
}
