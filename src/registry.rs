use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Frequency;
use crate::error::EconError;

pub const COUNTRIES_PLACEHOLDER: &str = "{countries}";
pub const FREQUENCY_PLACEHOLDER: &str = "{frequency}";

pub const ALL_COUNTRIES: &[&str] = &[
    // OECD members
    "AUS", "AUT", "BEL", "CAN", "CHL", "COL", "CRI", "CZE", "DNK", "EST", "FIN", "FRA", "DEU",
    "GRC", "HUN", "ISL", "IRL", "ISR", "ITA", "JPN", "KOR", "LVA", "LTU", "LUX", "MEX", "NLD",
    "NZL", "NOR", "POL", "PRT", "SVK", "SVN", "ESP", "SWE", "CHE", "TUR", "GBR", "USA",
    // aggregates
    "G7", "EA20", "EU15", "EU27_2020", "OECD", "OECD26", "OECDE",
    // non-members
    "ARG", "BRA", "BGR", "HRV", "IND", "IDN", "ROU", "SAU", "ZAF", "USMCA",
];

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("AUS", "Australia"),
    ("AUT", "Austria"),
    ("BEL", "Belgium"),
    ("CAN", "Canada"),
    ("CHL", "Chile"),
    ("COL", "Colombia"),
    ("CRI", "Costa Rica"),
    ("CZE", "Czechia"),
    ("DNK", "Denmark"),
    ("EST", "Estonia"),
    ("FIN", "Finland"),
    ("FRA", "France"),
    ("DEU", "Germany"),
    ("GRC", "Greece"),
    ("HUN", "Hungary"),
    ("ISL", "Iceland"),
    ("IRL", "Ireland"),
    ("ISR", "Israel"),
    ("ITA", "Italy"),
    ("JPN", "Japan"),
    ("KOR", "Korea"),
    ("LVA", "Latvia"),
    ("LTU", "Lithuania"),
    ("LUX", "Luxembourg"),
    ("MEX", "Mexico"),
    ("NLD", "Netherlands"),
    ("NZL", "New Zealand"),
    ("NOR", "Norway"),
    ("POL", "Poland"),
    ("PRT", "Portugal"),
    ("SVK", "Slovakia"),
    ("SVN", "Slovenia"),
    ("ESP", "Spain"),
    ("SWE", "Sweden"),
    ("CHE", "Switzerland"),
    ("TUR", "Turkey"),
    ("GBR", "United Kingdom"),
    ("USA", "United States"),
    ("EA20", "Euro area (20 countries)"),
    ("EU27_2020", "European Union (27 countries from 01/02/2020)"),
];

/// Canonical display name for an ISO code or a known name; anything else is
/// returned trimmed but otherwise untouched.
pub fn standardize_country(raw: &str) -> String {
    let trimmed = raw.trim();
    COUNTRY_NAMES
        .iter()
        .find(|(code, name)| *code == trimmed || *name == trimmed)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Logical CSV field to header name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    #[serde(default = "default_country_column")]
    pub country: String,
    #[serde(default = "default_time_column")]
    pub time_period: String,
    #[serde(default = "default_value_column")]
    pub value: String,
    #[serde(default = "default_status_column")]
    pub status: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            country: default_country_column(),
            time_period: default_time_column(),
            value: default_value_column(),
            status: default_status_column(),
        }
    }
}

fn default_country_column() -> String {
    "Reference area".to_string()
}

fn default_time_column() -> String {
    "TIME_PERIOD".to_string()
}

fn default_value_column() -> String {
    "OBS_VALUE".to_string()
}

fn default_status_column() -> String {
    "OBS_STATUS".to_string()
}

fn default_frequency() -> Frequency {
    Frequency::Quarterly
}

fn default_source() -> String {
    "OECD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub dataset_path: String,
    #[serde(default)]
    pub data_selection_template: String,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    #[serde(default)]
    pub columns: ColumnMap,
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<(), EconError> {
        let mut missing = Vec::new();
        if self.dataset_path.trim().is_empty() {
            missing.push("dataset_path");
        }
        if self.data_selection_template.trim().is_empty() {
            missing.push("data_selection_template");
        }
        if self.countries.is_empty() {
            missing.push("countries");
        }
        if self.metric_name.trim().is_empty() {
            missing.push("metric_name");
        }
        if !missing.is_empty() {
            return Err(EconError::Configuration(format!(
                "dataset '{}' is missing {}",
                self.name,
                missing.join(", ")
            )));
        }
        if !self.data_selection_template.contains(COUNTRIES_PLACEHOLDER) {
            return Err(EconError::Configuration(format!(
                "dataset '{}' selection template has no {COUNTRIES_PLACEHOLDER} placeholder",
                self.name
            )));
        }
        Ok(())
    }
}

/// Immutable name → dataset mapping, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, DatasetConfig>,
}

impl DatasetRegistry {
    pub fn new(datasets: impl IntoIterator<Item = DatasetConfig>) -> Self {
        Self {
            datasets: datasets
                .into_iter()
                .map(|config| (config.name.clone(), config))
                .collect(),
        }
    }

    pub fn with_builtins() -> Self {
        Self::new(builtin_datasets())
    }

    /// Entries in `overrides` replace built-ins of the same name.
    pub fn merged(self, overrides: impl IntoIterator<Item = DatasetConfig>) -> Self {
        let mut datasets = self.datasets;
        for config in overrides {
            datasets.insert(config.name.clone(), config);
        }
        Self { datasets }
    }

    pub fn get(&self, name: &str) -> Result<&DatasetConfig, EconError> {
        self.datasets
            .get(name)
            .ok_or_else(|| EconError::UnknownDataset {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetConfig> {
        self.datasets.values()
    }
}

pub fn builtin_datasets() -> Vec<DatasetConfig> {
    let countries: Vec<String> = ALL_COUNTRIES.iter().map(|c| c.to_string()).collect();
    vec![
        DatasetConfig {
            name: "gdp_per_capita".to_string(),
            dataset_path: "OECD.SDD.NAD,DSD_NAMAIN1@DF_QNA_EXPENDITURE_CAPITA,1.1".to_string(),
            data_selection_template: "Q..{countries}........LR..".to_string(),
            countries: countries.clone(),
            metric_name: "gdp_per_capita".to_string(),
            unit: "USD_PPP".to_string(),
            source: default_source(),
            description: "Quarterly GDP per capita, chain-linked volumes (rebased), PPP"
                .to_string(),
            frequency: Frequency::Quarterly,
            columns: ColumnMap::default(),
        },
        DatasetConfig {
            name: "real_gdp".to_string(),
            dataset_path: "OECD.SDD.NAD,DSD_NAMAIN1@DF_QNA,1.1".to_string(),
            data_selection_template: "Q.Y.{countries}.S1..B1GQ._Z...USD_PPP...T0102".to_string(),
            countries,
            metric_name: "real_gdp".to_string(),
            unit: "USD_PPP".to_string(),
            source: default_source(),
            description: "Quarterly National Accounts - Real GDP, seasonally adjusted, PPP"
                .to_string(),
            frequency: Frequency::Quarterly,
            columns: ColumnMap::default(),
        },
    ]
}
