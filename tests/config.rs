use std::time::Duration;

use assert_matches::assert_matches;

use oecd_econ_data::config::{LatestAnchor, SettingsLoader};
use oecd_econ_data::domain::Frequency;
use oecd_econ_data::error::EconError;

#[test]
fn settings_file_overrides_defaults_and_adds_datasets() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("econ-data.json");
    std::fs::write(
        &path,
        r#"{
            "database_path": "/tmp/econ.db",
            "timeout_secs": 15,
            "max_attempts": 2,
            "retry_base_delay_ms": 250,
            "batch_size": 10,
            "latest_anchor": "storage",
            "datasets": [{
                "name": "household_savings",
                "dataset_path": "OECD.SDD.NAD,DSD_NASEC20@DF_T7II_A,1.0",
                "data_selection_template": "A.{countries}.S14_S15.B8G",
                "countries": ["FRA", "DEU"],
                "metric_name": "savings_rate",
                "unit": "percent",
                "frequency": "annual"
            }]
        }"#,
    )
    .unwrap();

    let settings = SettingsLoader::resolve(path.to_str()).unwrap();

    assert_eq!(settings.database_path.as_str(), "/tmp/econ.db");
    assert_eq!(settings.timeout, Duration::from_secs(15));
    assert_eq!(settings.retry.max_attempts, 2);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
    assert_eq!(settings.batch_size, 10);
    assert_eq!(settings.latest_anchor, LatestAnchor::Storage);

    let registry = settings.registry();
    let savings = registry.get("household_savings").unwrap();
    assert_eq!(savings.frequency, Frequency::Annual);
    assert_eq!(savings.source, "OECD");
    assert_eq!(savings.columns.value, "OBS_VALUE");
    assert!(registry.get("gdp_per_capita").is_ok());
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        SettingsLoader::resolve(path.to_str()),
        Err(EconError::ConfigRead(_))
    );
}

#[test]
fn dataset_without_countries_placeholder_is_rejected() {
    let json = r#"{"datasets": [{
        "name": "bad",
        "dataset_path": "X",
        "data_selection_template": "Q.ESP",
        "countries": ["ESP"],
        "metric_name": "bad"
    }]}"#;
    assert_matches!(
        SettingsLoader::from_json(json),
        Err(EconError::Configuration(_))
    );
}

#[test]
fn zero_batch_size_is_rejected() {
    assert_matches!(
        SettingsLoader::from_json(r#"{"batch_size": 0}"#),
        Err(EconError::ConfigParse(_))
    );
}
