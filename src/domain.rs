use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EconError;

static QUARTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-?Q([1-4])$").expect("valid quarter regex"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})$").expect("valid year regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Quarterly,
    Annual,
}

impl Frequency {
    /// SDMX frequency code used in dimension selections.
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Quarterly => "Q",
            Frequency::Annual => "A",
        }
    }

    pub fn periods_per_year(&self) -> i64 {
        match self {
            Frequency::Quarterly => 4,
            Frequency::Annual => 1,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Quarterly => write!(f, "quarterly"),
            Frequency::Annual => write!(f, "annual"),
        }
    }
}

/// A reporting period: `YYYY-QN` for quarterly series, `YYYY` for annual ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimePeriod {
    Quarter { year: i32, quarter: u8 },
    Year(i32),
}

impl TimePeriod {
    pub fn quarter(year: i32, quarter: u8) -> Result<Self, EconError> {
        if !(1..=4).contains(&quarter) {
            return Err(EconError::InvalidPeriod(format!("{year}-Q{quarter}")));
        }
        Ok(TimePeriod::Quarter { year, quarter })
    }

    pub fn year(&self) -> i32 {
        match self {
            TimePeriod::Quarter { year, .. } | TimePeriod::Year(year) => *year,
        }
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            TimePeriod::Quarter { .. } => Frequency::Quarterly,
            TimePeriod::Year(_) => Frequency::Annual,
        }
    }

    /// Period containing `date` at the given frequency.
    pub fn containing(date: NaiveDate, frequency: Frequency) -> Self {
        match frequency {
            Frequency::Quarterly => TimePeriod::Quarter {
                year: date.year(),
                quarter: (date.month0() / 3 + 1) as u8,
            },
            Frequency::Annual => TimePeriod::Year(date.year()),
        }
    }

    /// Moves the period by `steps` units of its own frequency.
    pub fn shift(&self, steps: i64) -> Self {
        match *self {
            TimePeriod::Quarter { year, quarter } => {
                let index = i64::from(year) * 4 + i64::from(quarter) - 1 + steps;
                TimePeriod::Quarter {
                    year: index.div_euclid(4) as i32,
                    quarter: (index.rem_euclid(4) + 1) as u8,
                }
            }
            TimePeriod::Year(year) => TimePeriod::Year((i64::from(year) + steps) as i32),
        }
    }

    pub fn next(&self) -> Self {
        self.shift(1)
    }

    pub fn previous(&self) -> Self {
        self.shift(-1)
    }

    fn sort_key(&self) -> (i32, u8) {
        match *self {
            TimePeriod::Quarter { year, quarter } => (year, quarter),
            TimePeriod::Year(year) => (year, 0),
        }
    }
}

impl Ord for TimePeriod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for TimePeriod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePeriod::Quarter { year, quarter } => write!(f, "{year}-Q{quarter}"),
            TimePeriod::Year(year) => write!(f, "{year}"),
        }
    }
}

impl FromStr for TimePeriod {
    type Err = EconError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Some(caps) = QUARTER_RE.captures(trimmed) {
            let year = caps[1]
                .parse()
                .map_err(|_| EconError::InvalidPeriod(value.to_string()))?;
            let quarter = caps[2]
                .parse()
                .map_err(|_| EconError::InvalidPeriod(value.to_string()))?;
            return Ok(TimePeriod::Quarter { year, quarter });
        }
        if let Some(caps) = YEAR_RE.captures(trimmed) {
            let year = caps[1]
                .parse()
                .map_err(|_| EconError::InvalidPeriod(value.to_string()))?;
            return Ok(TimePeriod::Year(year));
        }
        Err(EconError::InvalidPeriod(value.to_string()))
    }
}

impl TryFrom<String> for TimePeriod {
    type Error = EconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimePeriod> for String {
    fn from(period: TimePeriod) -> Self {
        period.to_string()
    }
}

/// SDMX observation status (CL_OBS_STATUS).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum ObservationStatus {
    Normal,
    Estimated,
    Provisional,
    Forecast,
    Missing,
    Break,
    Imputed,
    Strike,
    Unspecified,
    Other(String),
}

impl ObservationStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "A" => ObservationStatus::Normal,
            "E" => ObservationStatus::Estimated,
            "P" => ObservationStatus::Provisional,
            "F" => ObservationStatus::Forecast,
            "M" => ObservationStatus::Missing,
            "B" => ObservationStatus::Break,
            "I" => ObservationStatus::Imputed,
            "S" => ObservationStatus::Strike,
            "" => ObservationStatus::Unspecified,
            other => ObservationStatus::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ObservationStatus::Normal => "A",
            ObservationStatus::Estimated => "E",
            ObservationStatus::Provisional => "P",
            ObservationStatus::Forecast => "F",
            ObservationStatus::Missing => "M",
            ObservationStatus::Break => "B",
            ObservationStatus::Imputed => "I",
            ObservationStatus::Strike => "S",
            ObservationStatus::Unspecified => "",
            ObservationStatus::Other(code) => code,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObservationStatus::Normal => "Normal",
            ObservationStatus::Estimated => "Estimated",
            ObservationStatus::Provisional => "Provisional",
            ObservationStatus::Forecast => "Forecast",
            ObservationStatus::Missing => "Missing",
            ObservationStatus::Break => "Break",
            ObservationStatus::Imputed => "Imputed",
            ObservationStatus::Strike => "Strike",
            ObservationStatus::Unspecified => "Not available",
            ObservationStatus::Other(_) => "Unknown",
        }
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationStatus::Unspecified => write!(f, "(none) ({})", self.label()),
            other => write!(f, "{} ({})", other.code(), other.label()),
        }
    }
}

impl From<ObservationStatus> for String {
    fn from(status: ObservationStatus) -> Self {
        status.code().to_string()
    }
}

/// Which observation statuses survive parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    Disabled,
    Allow(BTreeSet<ObservationStatus>),
}

impl StatusFilter {
    /// Normal and Estimated, plus Provisional when asked for. Forecast and
    /// Missing are never admitted by this constructor.
    pub fn from_flags(filter_status: bool, include_provisional: bool) -> Self {
        if !filter_status {
            return StatusFilter::Disabled;
        }
        let mut allowed = BTreeSet::from([ObservationStatus::Normal, ObservationStatus::Estimated]);
        if include_provisional {
            allowed.insert(ObservationStatus::Provisional);
        }
        StatusFilter::Allow(allowed)
    }

    pub fn allows(&self, status: &ObservationStatus) -> bool {
        match self {
            StatusFilter::Disabled => true,
            StatusFilter::Allow(allowed) => allowed.contains(status),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StatusFilter::Disabled => "all statuses".to_string(),
            StatusFilter::Allow(allowed) => allowed
                .iter()
                .map(|status| status.code().to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl Default for StatusFilter {
    fn default() -> Self {
        StatusFilter::from_flags(true, false)
    }
}

/// Named combinations of allowed statuses and per-period country coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FilterPreset {
    /// A and E, 30+ countries per period.
    Gdp,
    /// A only, 35+ countries per period.
    Strict,
    /// A, E and P, 20+ countries per period.
    Permissive,
}

impl FilterPreset {
    pub fn status_filter(&self) -> StatusFilter {
        match self {
            FilterPreset::Gdp => StatusFilter::from_flags(true, false),
            FilterPreset::Strict => {
                StatusFilter::Allow(BTreeSet::from([ObservationStatus::Normal]))
            }
            FilterPreset::Permissive => StatusFilter::from_flags(true, true),
        }
    }

    pub fn min_countries(&self) -> usize {
        match self {
            FilterPreset::Gdp => 30,
            FilterPreset::Strict => 35,
            FilterPreset::Permissive => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub country: String,
    pub time_period: TimePeriod,
    pub value: f64,
    pub status: ObservationStatus,
}

/// One row of the `economic_data` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicDataRecord {
    pub country: String,
    pub time_period: String,
    pub metric_name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub source: Option<String>,
    pub last_updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_quarter_and_year() {
        let q: TimePeriod = "2024-Q3".parse().unwrap();
        assert_eq!(q, TimePeriod::Quarter { year: 2024, quarter: 3 });
        let y: TimePeriod = " 1999 ".parse().unwrap();
        assert_eq!(y, TimePeriod::Year(1999));
    }

    #[test]
    fn parse_period_invalid() {
        assert_matches!("2024-Q5".parse::<TimePeriod>(), Err(EconError::InvalidPeriod(_)));
        assert_matches!("Q1-2024".parse::<TimePeriod>(), Err(EconError::InvalidPeriod(_)));
    }

    #[test]
    fn shift_wraps_years() {
        let q: TimePeriod = "2024-Q1".parse().unwrap();
        assert_eq!(q.previous().to_string(), "2023-Q4");
        assert_eq!(q.shift(7).to_string(), "2025-Q4");
        assert_eq!(TimePeriod::Year(2020).shift(-3).to_string(), "2017");
    }

    #[test]
    fn presets_pair_statuses_with_coverage() {
        let strict = FilterPreset::Strict.status_filter();
        assert!(strict.allows(&ObservationStatus::Normal));
        assert!(!strict.allows(&ObservationStatus::Estimated));
        assert!(FilterPreset::Permissive
            .status_filter()
            .allows(&ObservationStatus::Provisional));
        assert_eq!(FilterPreset::Gdp.status_filter(), StatusFilter::default());
        assert_eq!(FilterPreset::Gdp.min_countries(), 30);
        assert_eq!(FilterPreset::Strict.min_countries(), 35);
        assert_eq!(FilterPreset::Permissive.min_countries(), 20);
    }

    #[test]
    fn shift_normalizes_out_of_range_quarter() {
        let raw = TimePeriod::Quarter { year: 2020, quarter: 0 };
        assert_eq!(raw.shift(0).to_string(), "2019-Q4");
        assert_eq!(raw.next().to_string(), "2020-Q1");
    }

    #[test]
    fn chronological_order_is_not_lexical() {
        let mut periods: Vec<TimePeriod> = ["2001-Q1", "1999-Q4", "2000-Q2", "2000-Q1"]
            .iter()
            .map(|p| p.parse().unwrap())
            .collect();
        periods.sort();
        let rendered: Vec<String> = periods.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1999-Q4", "2000-Q1", "2000-Q2", "2001-Q1"]);
    }

    #[test]
    fn status_filter_flags() {
        let default = StatusFilter::from_flags(true, false);
        assert!(default.allows(&ObservationStatus::Normal));
        assert!(default.allows(&ObservationStatus::Estimated));
        assert!(!default.allows(&ObservationStatus::Provisional));

        let provisional = StatusFilter::from_flags(true, true);
        assert!(provisional.allows(&ObservationStatus::Provisional));
        assert!(!provisional.allows(&ObservationStatus::Forecast));
        assert!(!provisional.allows(&ObservationStatus::Missing));

        assert!(StatusFilter::from_flags(false, false).allows(&ObservationStatus::Forecast));
    }

    #[test]
    fn unknown_status_code_is_preserved() {
        let status = ObservationStatus::from_code("X");
        assert_eq!(status.code(), "X");
        assert_eq!(status.label(), "Unknown");
    }
}
