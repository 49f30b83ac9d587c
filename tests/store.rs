use camino::Utf8PathBuf;

use oecd_econ_data::store::{EconomicStore, UpsertCounts, UpsertRow};

fn spain_q1(value: f64) -> UpsertRow {
    UpsertRow {
        country: "Spain".to_string(),
        time_period: "2020-Q1".to_string(),
        value,
    }
}

#[test]
fn upsert_same_key_twice_keeps_one_record() {
    let mut store = EconomicStore::open_in_memory().unwrap();

    let first = store
        .upsert("gdp_per_capita", "USD_PPP", "OECD", &[spain_q1(42152.2)])
        .unwrap();
    let second = store
        .upsert("gdp_per_capita", "USD_PPP", "OECD", &[spain_q1(42152.2)])
        .unwrap();

    assert_eq!(first, UpsertCounts { inserted: 1, updated: 0 });
    assert_eq!(second, UpsertCounts { inserted: 0, updated: 1 });
    assert_eq!(store.count("gdp_per_capita").unwrap(), 1);
    let record = store.get("Spain", "2020-Q1", "gdp_per_capita").unwrap().unwrap();
    assert_eq!(record.value, 42152.2);
    assert_eq!(record.unit.as_deref(), Some("USD_PPP"));
    assert!(record.last_updated.is_some());
}

#[test]
fn upsert_replaces_value_unit_and_source() {
    let mut store = EconomicStore::open_in_memory().unwrap();
    store.upsert("m", "USD", "OECD", &[spain_q1(1.0)]).unwrap();
    store.upsert("m", "EUR", "Manual", &[spain_q1(2.0)]).unwrap();

    let record = store.get("Spain", "2020-Q1", "m").unwrap().unwrap();
    assert_eq!(record.value, 2.0);
    assert_eq!(record.unit.as_deref(), Some("EUR"));
    assert_eq!(record.source.as_deref(), Some("Manual"));
}

#[test]
fn same_country_and_period_under_other_metric_is_separate() {
    let mut store = EconomicStore::open_in_memory().unwrap();
    store.upsert("a", "u", "s", &[spain_q1(1.0)]).unwrap();
    store.upsert("b", "u", "s", &[spain_q1(2.0)]).unwrap();
    assert_eq!(store.stats().unwrap().total_records, 2);
    assert!(store.get("Spain", "2020-Q1", "c").unwrap().is_none());
}

#[test]
fn open_creates_parent_dirs_and_persists() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/dir/economic_data.db")).unwrap();

    {
        let mut store = EconomicStore::open(&path).unwrap();
        store.upsert("m", "u", "s", &[spain_q1(3.5)]).unwrap();
    }

    let reopened = EconomicStore::open(&path).unwrap();
    assert_eq!(reopened.count("m").unwrap(), 1);
    assert_eq!(reopened.series("m").unwrap()[0].value, 3.5);
}
