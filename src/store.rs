//! ==============================================================================
//! store.rs - durable result store (sqlite)
//! ==============================================================================
//!
//! schema (user_version 1):
//!
//!     test_samples   (id INTEGER PK AUTOINCREMENT, test_time INTEGER unix ns,
//!                     spectro_machine, furnace_name, sample_name)
//!     sample_results (id -> test_samples.id, one nullable REAL per element)
//!
//! the element columns are fixed; readings for any other element code are
//! logged and dropped at ingest.
//!
//! relationships:
//!     - ingest.rs runs the dedup walk on a transaction opened here
//!     - api.rs reads the latest rows
//!
//! ==============================================================================

use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{ElementResult, SampleResult};
use crate::ingest::{self, from_nanos, IngestReport};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp {0} cannot be stored")]
    Timestamp(chrono::DateTime<chrono::Utc>),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Element columns of `sample_results`, in column order.
pub const ELEMENTS: [&str; 25] = [
    "C", "Si", "Mn", "P", "S", "Cu", "Cr", "Al", "Ti", "Sn", "Zn", "Pb", "Ni", "Mo", "Co", "Nb",
    "V", "W", "Mg", "Bi", "Ca", "As", "Sb", "Te", "Fe",
];

pub fn element_column(code: &str) -> Option<usize> {
    ELEMENTS.iter().position(|e| *e == code)
}

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS test_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_time INTEGER NOT NULL,
    spectro_machine INTEGER NOT NULL,
    furnace_name TEXT NOT NULL,
    sample_name TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS test_samples_time ON test_samples (test_time);
CREATE INDEX IF NOT EXISTS test_samples_furnace_time ON test_samples (furnace_name, test_time);
CREATE TABLE IF NOT EXISTS sample_results (
    id INTEGER PRIMARY KEY REFERENCES test_samples (id),
    "C" REAL, "Si" REAL, "Mn" REAL, "P" REAL, "S" REAL, "Cu" REAL, "Cr" REAL, "Al" REAL,
    "Ti" REAL, "Sn" REAL, "Zn" REAL, "Pb" REAL, "Ni" REAL, "Mo" REAL, "Co" REAL, "Nb" REAL,
    "V" REAL, "W" REAL, "Mg" REAL, "Bi" REAL, "Ca" REAL, "As" REAL, "Sb" REAL, "Te" REAL,
    "Fe" REAL
);
"#;

pub(crate) const INSERT_ELEMENTS_SQL: &str = r#"
INSERT INTO sample_results (id,
    "C", "Si", "Mn", "P", "S", "Cu", "Cr", "Al", "Ti", "Sn", "Zn", "Pb", "Ni", "Mo", "Co", "Nb",
    "V", "W", "Mg", "Bi", "Ca", "As", "Sb", "Te", "Fe")
VALUES (?1,
    ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
"#;

const SELECT_RESULTS_SQL: &str = r#"
SELECT s.test_time, s.spectro_machine, s.furnace_name, s.sample_name,
    r."C", r."Si", r."Mn", r."P", r."S", r."Cu", r."Cr", r."Al", r."Ti", r."Sn", r."Zn", r."Pb",
    r."Ni", r."Mo", r."Co", r."Nb", r."V", r."W", r."Mg", r."Bi", r."Ca", r."As", r."Sb", r."Te",
    r."Fe"
FROM test_samples s LEFT JOIN sample_results r ON r.id = s.id
"#;

const RESULT_FIXED_COLUMNS: usize = 4;

/// Cheap to clone; every clone shares one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database. `transaction_timeout` bounds how long a
    /// transaction waits on a locked database.
    pub fn open(path: impl AsRef<Path>, transaction_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(transaction_timeout)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Persist the new results of a newest-first batch in one transaction.
    pub async fn ingest(&self, results: Vec<SampleResult>) -> Result<IngestReport, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let report = ingest::ingest(&tx, &results)?;
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    pub async fn latest_results(&self, limit: u32) -> Result<Vec<SampleResult>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("{} ORDER BY s.test_time DESC, s.id DESC LIMIT ?1", SELECT_RESULTS_SQL);
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![limit], row_to_result)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Newest result of each named furnace that has any, in request order.
    pub async fn latest_of_furnaces(&self, furnaces: Vec<String>) -> Result<Vec<SampleResult>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE s.furnace_name = ?1 ORDER BY s.test_time DESC, s.id DESC LIMIT 1",
                SELECT_RESULTS_SQL
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut out = Vec::with_capacity(furnaces.len());
            for name in &furnaces {
                let mut rows = stmt.query_map(params![name], row_to_result)?;
                if let Some(r) = rows.next() {
                    out.push(r?);
                }
            }
            Ok(out)
        })
        .await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM test_samples", [], |r| r.get(0))?))
            .await
    }
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<SampleResult> {
    let mut elements = Vec::new();
    for (i, code) in ELEMENTS.iter().enumerate() {
        if let Some(value) = row.get::<_, Option<f64>>(RESULT_FIXED_COLUMNS + i)? {
            elements.push(ElementResult { element: code.to_string(), value });
        }
    }
    Ok(SampleResult {
        time_stamp: from_nanos(row.get(0)?),
        source_machine: row.get(1)?,
        furnace: row.get(2)?,
        sample_name: row.get(3)?,
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ElementResult;
    use chrono::{TimeZone, Utc};

    fn memory_store() -> Store {
        Store::open(":memory:", Duration::from_secs(5)).unwrap()
    }

    fn result(furnace: &str, secs: i64, machine: i64) -> SampleResult {
        SampleResult {
            sample_name: format!("{}-{}-{}", furnace, secs, machine),
            furnace: furnace.into(),
            time_stamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            source_machine: machine,
            elements: vec![
                ElementResult { element: "C".into(), value: 3.4 },
                ElementResult { element: "Mn".into(), value: 0.6 },
            ],
        }
    }

    fn newest_first(mut batch: Vec<SampleResult>) -> Vec<SampleResult> {
        batch.sort_by(|a, b| b.time_stamp.cmp(&a.time_stamp));
        batch
    }

    async fn all_rows(store: &Store) -> Vec<SampleResult> {
        let mut rows = store.latest_results(1000).await.unwrap();
        rows.sort_by(|a, b| a.sample_name.cmp(&b.sample_name));
        rows
    }

    #[tokio::test]
    async fn test_same_batch_twice_inserts_once() {
        let store = memory_store();
        let batch = newest_first(vec![result("F1", 10, 1), result("F2", 20, 2), result("F1", 30, 1)]);

        let first = store.ingest(batch.clone()).await.unwrap();
        assert_eq!(first.inserted, 3);
        let rows_after_first = all_rows(&store).await;

        let second = store.ingest(batch).await.unwrap();
        assert_eq!(second, IngestReport { inserted: 0, skipped: 3 });
        assert_eq!(all_rows(&store).await, rows_after_first);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_back() {
        let store = memory_store();
        let batches = vec![
            vec![result("F1", 50, 1)],
            vec![result("F1", 40, 1)],
            newest_first(vec![result("F1", 60, 1), result("F1", 45, 2)]),
            vec![],
            vec![result("F1", 60, 1)],
        ];

        let mut max_seen = None;
        for batch in batches {
            store.ingest(batch).await.unwrap();
            let tip = store.latest_results(1).await.unwrap()[0].event_key();
            if let Some(prev) = max_seen {
                assert!(tip >= prev, "watermark went from {:?} to {:?}", prev, tip);
            }
            max_seen = Some(tip);
        }
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_order_does_not_change_rows() {
        let oldest_first = vec![result("F1", 10, 1), result("F2", 20, 2), result("F3", 30, 3)];

        let a = memory_store();
        a.ingest(newest_first(oldest_first.clone())).await.unwrap();

        let b = memory_store();
        b.ingest(oldest_first).await.unwrap();

        assert_eq!(all_rows(&a).await.len(), 3);
        assert_eq!(all_rows(&a).await, all_rows(&b).await);
    }

    #[tokio::test]
    async fn test_equal_timestamps_different_machines_both_kept() {
        let store = memory_store();
        let report = store
            .ingest(vec![result("F1", 10, 1), result("F2", 10, 2)])
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);

        // the tip (machine 1 was walked last) blocks only its own exact twin
        let report = store.ingest(vec![result("F1", 10, 1), result("F2", 10, 2)]).await.unwrap();
        assert_eq!(report, IngestReport { inserted: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn test_late_record_older_than_tip_is_dropped() {
        let store = memory_store();
        store.ingest(newest_first(vec![result("F1", 10, 1), result("F1", 30, 1)])).await.unwrap();

        let report = store.ingest(vec![result("F2", 20, 2)]).await.unwrap();
        assert_eq!(report, IngestReport { inserted: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_batch() {
        let store = memory_store();
        store
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON test_samples
                 WHEN NEW.sample_name = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let mut bad = result("F1", 30, 1);
        bad.sample_name = "bad".into();
        let batch = newest_first(vec![result("F1", 10, 1), result("F1", 20, 1), bad]);

        assert!(store.ingest(batch).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_elements_round_trip_through_fixed_columns() {
        let store = memory_store();
        let mut r = result("F1", 10, 1);
        r.elements.push(ElementResult { element: "Unobtainium".into(), value: 9.9 });
        store.ingest(vec![r]).await.unwrap();

        let got = store.latest_results(5).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(
            got[0].elements,
            vec![
                ElementResult { element: "C".into(), value: 3.4 },
                ElementResult { element: "Mn".into(), value: 0.6 },
            ]
        );
    }

    #[tokio::test]
    async fn test_latest_results_limit_and_order() {
        let store = memory_store();
        let batch = newest_first((0..30).map(|i| result("F1", i * 10, 1)).collect());
        store.ingest(batch).await.unwrap();

        let got = store.latest_results(20).await.unwrap();
        assert_eq!(got.len(), 20);
        assert_eq!(got[0].time_stamp, Utc.timestamp_opt(1_700_000_290, 0).unwrap());
        assert!(got.windows(2).all(|w| w[0].time_stamp >= w[1].time_stamp));
    }

    #[tokio::test]
    async fn test_latest_of_furnaces() {
        let store = memory_store();
        let batch = newest_first(vec![
            result("F1", 10, 1),
            result("F2", 20, 1),
            result("F1", 30, 1),
        ]);
        store.ingest(batch).await.unwrap();

        let got = store
            .latest_of_furnaces(vec!["F2".into(), "F9".into(), "F1".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].furnace, "F2");
        assert_eq!(got[1].sample_name, "F1-30-1");
    }

    #[test]
    fn test_insert_sql_lists_every_element() {
        for code in ELEMENTS {
            assert!(INSERT_ELEMENTS_SQL.contains(&format!("\"{}\"", code)), "{} missing", code);
            assert!(SELECT_RESULTS_SQL.contains(&format!("r.\"{}\"", code)), "{} missing", code);
        }
        assert!(INSERT_ELEMENTS_SQL.contains("?26"));
    }
}
