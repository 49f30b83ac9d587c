use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::domain::EconomicDataRecord;
use crate::error::EconError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS economic_data (
        country TEXT NOT NULL,
        time_period TEXT NOT NULL,
        metric_name TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT,
        source TEXT,
        last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (country, time_period, metric_name)
    );
    CREATE INDEX IF NOT EXISTS idx_country ON economic_data(country);
    CREATE INDEX IF NOT EXISTS idx_metric ON economic_data(metric_name);
    CREATE INDEX IF NOT EXISTS idx_time ON economic_data(time_period);
    CREATE INDEX IF NOT EXISTS idx_country_metric ON economic_data(country, metric_name);
";

const UPSERT: &str = "
    INSERT INTO economic_data
        (country, time_period, metric_name, value, unit, source, last_updated)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(country, time_period, metric_name)
    DO UPDATE SET
        value = excluded.value,
        unit = excluded.unit,
        source = excluded.source,
        last_updated = excluded.last_updated
";

/// A value to write under `(country, time_period, metric)`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRow {
    pub country: String,
    pub time_period: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricInfo {
    pub name: String,
    pub unit: Option<String>,
    pub source: Option<String>,
    pub data_points: usize,
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryInfo {
    pub name: String,
    pub data_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub unique_metrics: usize,
    pub unique_countries: usize,
    pub unique_periods: usize,
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

pub struct EconomicStore {
    conn: Connection,
}

impl EconomicStore {
    /// Opens (creating if needed) the database file and its schema.
    pub fn open(path: &Utf8Path) -> Result<Self, EconError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| EconError::Filesystem(format!("create {parent}: {err}")))?;
            }
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, EconError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, EconError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert-or-replace keyed on `(country, time_period, metric)`, in one
    /// transaction. Every row in the batch shares `last_updated`. A key repeated
    /// within `rows` takes its last value and is counted once.
    pub fn upsert(
        &mut self,
        metric_name: &str,
        unit: &str,
        source: &str,
        rows: &[UpsertRow],
    ) -> Result<UpsertCounts, EconError> {
        let timestamp = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut counts = UpsertCounts::default();
        let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(rows.len());
        {
            let mut exists = tx.prepare(
                "SELECT 1 FROM economic_data
                 WHERE country = ?1 AND time_period = ?2 AND metric_name = ?3",
            )?;
            let mut upsert = tx.prepare(UPSERT)?;
            for row in rows {
                let first_in_batch =
                    seen.insert((row.country.as_str(), row.time_period.as_str()));
                let existing = exists
                    .query_row(params![row.country, row.time_period, metric_name], |r| {
                        r.get::<_, i64>(0)
                    })
                    .optional()?;
                upsert.execute(params![
                    row.country,
                    row.time_period,
                    metric_name,
                    row.value,
                    unit,
                    source,
                    timestamp,
                ])?;
                if !first_in_batch {
                    continue;
                }
                if existing.is_some() {
                    counts.updated += 1;
                } else {
                    counts.inserted += 1;
                }
            }
        }
        tx.commit()?;
        debug!(
            metric = metric_name,
            inserted = counts.inserted,
            updated = counts.updated,
            "store.upsert"
        );
        Ok(counts)
    }

    pub fn get(
        &self,
        country: &str,
        time_period: &str,
        metric_name: &str,
    ) -> Result<Option<EconomicDataRecord>, EconError> {
        let record = self
            .conn
            .query_row(
                "SELECT country, time_period, metric_name, value, unit, source, last_updated
                 FROM economic_data
                 WHERE country = ?1 AND time_period = ?2 AND metric_name = ?3",
                params![country, time_period, metric_name],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records of one metric ordered by country then period text.
    pub fn series(&self, metric_name: &str) -> Result<Vec<EconomicDataRecord>, EconError> {
        let mut stmt = self.conn.prepare(
            "SELECT country, time_period, metric_name, value, unit, source, last_updated
             FROM economic_data
             WHERE metric_name = ?1
             ORDER BY country, time_period",
        )?;
        let rows = stmt.query_map(params![metric_name], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count(&self, metric_name: &str) -> Result<usize, EconError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM economic_data WHERE metric_name = ?1",
            params![metric_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn metric_periods(&self, metric_name: &str) -> Result<Vec<String>, EconError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT time_period FROM economic_data WHERE metric_name = ?1",
        )?;
        let rows = stmt.query_map(params![metric_name], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn metrics(&self) -> Result<Vec<MetricInfo>, EconError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.metric_name,
                    (SELECT l.unit FROM economic_data l
                     WHERE l.metric_name = d.metric_name
                     ORDER BY l.last_updated DESC, l.rowid DESC LIMIT 1),
                    (SELECT l.source FROM economic_data l
                     WHERE l.metric_name = d.metric_name
                     ORDER BY l.last_updated DESC, l.rowid DESC LIMIT 1),
                    COUNT(*), MIN(d.time_period), MAX(d.time_period)
             FROM economic_data d
             GROUP BY d.metric_name
             ORDER BY d.metric_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MetricInfo {
                name: row.get(0)?,
                unit: row.get(1)?,
                source: row.get(2)?,
                data_points: row.get::<_, i64>(3)? as usize,
                earliest: row.get(4)?,
                latest: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn countries(&self, metric_name: Option<&str>) -> Result<Vec<CountryInfo>, EconError> {
        let rows = match metric_name {
            Some(metric) => {
                let mut stmt = self.conn.prepare(
                    "SELECT country, COUNT(*) FROM economic_data
                     WHERE metric_name = ?1
                     GROUP BY country ORDER BY country",
                )?;
                stmt.query_map(params![metric], row_to_country)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT country, COUNT(*) FROM economic_data
                     GROUP BY country ORDER BY country",
                )?;
                stmt.query_map([], row_to_country)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats, EconError> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT metric_name),
                    COUNT(DISTINCT country),
                    COUNT(DISTINCT time_period),
                    MIN(time_period),
                    MAX(time_period)
             FROM economic_data",
            [],
            |row| {
                Ok(StoreStats {
                    total_records: row.get::<_, i64>(0)? as usize,
                    unique_metrics: row.get::<_, i64>(1)? as usize,
                    unique_countries: row.get::<_, i64>(2)? as usize,
                    unique_periods: row.get::<_, i64>(3)? as usize,
                    earliest: row.get(4)?,
                    latest: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn row_to_country(row: &rusqlite::Row<'_>) -> rusqlite::Result<CountryInfo> {
    Ok(CountryInfo {
        name: row.get(0)?,
        data_points: row.get::<_, i64>(1)? as usize,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EconomicDataRecord> {
    Ok(EconomicDataRecord {
        country: row.get(0)?,
        time_period: row.get(1)?,
        metric_name: row.get(2)?,
        value: row.get(3)?,
        unit: row.get(4)?,
        source: row.get(5)?,
        last_updated: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(country: &str, period: &str, value: f64) -> UpsertRow {
        UpsertRow {
            country: country.to_string(),
            time_period: period.to_string(),
            value,
        }
    }

    #[test]
    fn upsert_counts_inserts_then_updates() {
        let mut store = EconomicStore::open_in_memory().unwrap();
        let first = store
            .upsert("m", "u", "s", &[row("Spain", "2020-Q1", 1.0), row("Spain", "2020-Q2", 2.0)])
            .unwrap();
        assert_eq!(first, UpsertCounts { inserted: 2, updated: 0 });

        let second = store
            .upsert("m", "u", "s", &[row("Spain", "2020-Q2", 3.0), row("Spain", "2020-Q3", 4.0)])
            .unwrap();
        assert_eq!(second, UpsertCounts { inserted: 1, updated: 1 });
        assert_eq!(store.count("m").unwrap(), 3);
    }

    #[test]
    fn repeated_key_in_one_batch_counts_once() {
        let mut store = EconomicStore::open_in_memory().unwrap();
        let counts = store
            .upsert("m", "u", "s", &[row("Spain", "2020-Q1", 1.0), row("Spain", "2020-Q1", 2.0)])
            .unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 1, updated: 0 });
        assert_eq!(store.get("Spain", "2020-Q1", "m").unwrap().unwrap().value, 2.0);
    }

    #[test]
    fn metric_listed_once_with_latest_unit() {
        let mut store = EconomicStore::open_in_memory().unwrap();
        store.upsert("gdp", "USD", "OECD", &[row("Spain", "2020-Q1", 1.0)]).unwrap();
        store.upsert("gdp", "USD_PPP", "OECD", &[row("Spain", "2020-Q2", 2.0)]).unwrap();

        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].unit.as_deref(), Some("USD_PPP"));
        assert_eq!(metrics[0].data_points, 2);
    }

    #[test]
    fn metrics_and_stats() {
        let mut store = EconomicStore::open_in_memory().unwrap();
        store
            .upsert("a", "USD", "OECD", &[row("Spain", "2020-Q1", 1.0), row("France", "2020-Q2", 2.0)])
            .unwrap();
        store.upsert("b", "percent", "Calculated", &[row("Spain", "2020-Q2", 5.0)]).unwrap();

        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "a");
        assert_eq!(metrics[0].data_points, 2);
        assert_eq!(metrics[0].earliest.as_deref(), Some("2020-Q1"));

        let countries = store.countries(Some("b")).unwrap();
        assert_eq!(countries.len(), 1);
        assert_eq!(countries[0].name, "Spain");

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.unique_metrics, 2);
        assert_eq!(stats.unique_countries, 2);
        assert_eq!(stats.latest.as_deref(), Some("2020-Q2"));
    }
}
