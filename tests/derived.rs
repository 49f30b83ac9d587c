use oecd_econ_data::derived::{DerivedMetric, find_derived};
use oecd_econ_data::store::{EconomicStore, UpsertRow};

fn rows(country: &str, values: &[(&str, f64)]) -> Vec<UpsertRow> {
    values
        .iter()
        .map(|(period, value)| UpsertRow {
            country: country.to_string(),
            time_period: period.to_string(),
            value: *value,
        })
        .collect()
}

fn seeded_store() -> EconomicStore {
    let mut store = EconomicStore::open_in_memory().unwrap();
    store
        .upsert(
            "gdp_per_capita",
            "USD_PPP",
            "OECD",
            &rows(
                "Spain",
                &[
                    ("2020-Q1", 42152.2),
                    ("2020-Q2", 34642.7),
                    ("2020-Q3", 40141.2),
                    ("2020-Q4", 40423.9),
                ],
            ),
        )
        .unwrap();
    store
        .upsert(
            "gdp_per_capita",
            "USD_PPP",
            "OECD",
            &rows("X", &[("2021-Q1", 100.0), ("2021-Q2", 110.0), ("2021-Q3", 105.0)]),
        )
        .unwrap();
    store
}

#[test]
fn productivity_growth_writes_deltas() {
    let mut store = seeded_store();
    let metric = find_derived("productivity_growth").unwrap();

    let result = metric.run(&mut store, false).unwrap();

    assert_eq!(result.records_computed, 5);
    assert_eq!(result.records_written, 5);
    assert!(store.get("X", "2021-Q1", "productivity_growth").unwrap().is_none());
    let q2 = store.get("X", "2021-Q2", "productivity_growth").unwrap().unwrap();
    let q3 = store.get("X", "2021-Q3", "productivity_growth").unwrap().unwrap();
    assert_eq!(q2.value, 10.0);
    assert_eq!(q3.value, -5.0);
    assert_eq!(q2.source.as_deref(), Some("Calculated"));
}

#[test]
fn cumulative_return_rebases_to_100() {
    let mut store = seeded_store();
    find_derived("gdp_per_capita_cumulative_return")
        .unwrap()
        .run(&mut store, false)
        .unwrap();

    let expected = [
        ("2020-Q1", 100.0),
        ("2020-Q2", 82.18),
        ("2020-Q3", 95.23),
        ("2020-Q4", 95.90),
    ];
    for (period, want) in expected {
        let got = store
            .get("Spain", period, "gdp_per_capita_cumulative_return")
            .unwrap()
            .unwrap()
            .value;
        assert!((got - want).abs() < 0.01, "{period}: {got} vs {want}");
    }
}

#[test]
fn savings_per_capita_uses_periods_in_both_sources() {
    let mut store = EconomicStore::open_in_memory().unwrap();
    store
        .upsert(
            "savings_rate",
            "percent",
            "OECD",
            &rows("Spain", &[("2023", 8.2), ("2024", 9.0)]),
        )
        .unwrap();
    store
        .upsert(
            "disposable_income_per_capita",
            "USD_PPP",
            "OECD",
            &rows("Spain", &[("2023", 56234.0)]),
        )
        .unwrap();

    let result = find_derived("savings_per_capita")
        .unwrap()
        .run(&mut store, false)
        .unwrap();

    assert_eq!(result.records_written, 1);
    assert_eq!(result.records_skipped, 1);
    let value = store
        .get("Spain", "2023", "savings_per_capita")
        .unwrap()
        .unwrap()
        .value;
    assert!((value - 4611.19).abs() < 0.01);
}

#[test]
fn dry_run_computes_without_writing() {
    let mut store = seeded_store();
    let result = find_derived("productivity_growth_pct")
        .unwrap()
        .run(&mut store, true)
        .unwrap();
    assert_eq!(result.records_computed, 5);
    assert_eq!(result.records_written, 0);
    assert_eq!(store.count("productivity_growth_pct").unwrap(), 0);
}

#[test]
fn rerun_reproduces_identical_records() {
    let mut store = seeded_store();
    let metric = DerivedMetric::rebase("gdp_per_capita", None);
    assert_eq!(metric.name, "gdp_per_capita_cumulative_return");

    let first = metric.run(&mut store, false).unwrap();
    let before = store.series(&metric.name).unwrap();
    let second = metric.run(&mut store, false).unwrap();
    let after = store.series(&metric.name).unwrap();

    assert_eq!(first.inserted, 7);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 7);
    let values = |records: &[oecd_econ_data::domain::EconomicDataRecord]| {
        records
            .iter()
            .map(|r| (r.country.clone(), r.time_period.clone(), r.value))
            .collect::<Vec<_>>()
    };
    assert_eq!(values(&before), values(&after));
}

#[test]
fn missing_source_metric_writes_nothing() {
    let mut store = EconomicStore::open_in_memory().unwrap();
    let result = DerivedMetric::rebase("unemployment", Some("unemployment_index"))
        .run(&mut store, false)
        .unwrap();
    assert_eq!(result.metric, "unemployment_index");
    assert_eq!(result.records_written, 0);
}

#[test]
fn gdp_level_matches_quarters_to_annual_population() {
    let mut store = seeded_store();
    store
        .upsert(
            "population",
            "persons",
            "OECD",
            &rows("Spain", &[("2020", 47_365_655.0)]),
        )
        .unwrap();

    let result = find_derived("gdp_level").unwrap().run(&mut store, false).unwrap();

    assert_eq!(result.sources, vec!["gdp_per_capita", "population"]);
    assert_eq!(result.records_written, 4);
    // Country X has no population figures.
    assert_eq!(result.records_skipped, 3);
    let q2 = store.get("Spain", "2020-Q2", "gdp_level").unwrap().unwrap();
    assert!((q2.value - 34642.7 * 47_365_655.0).abs() < 1.0);
    assert_eq!(q2.unit.as_deref(), Some("USD"));
}
