//! ==============================================================================
//! ingest.rs - watermark dedup and persistence of a result batch
//! ==============================================================================
//!
//! the watermark is the (time_stamp, spectro machine) of the row inserted
//! last, by id. it is read once per batch. walking the batch oldest to newest,
//! a result is skipped when
//!
//!     ts <  watermark.ts
//!     ts == watermark.ts && machine == watermark.machine
//!
//! and inserted otherwise. a result older than the tip but never seen before
//! is dropped too; only the tip row is consulted.
//!
//! everything runs on the caller's transaction: one failed insert and the
//! whole batch rolls back.
//!
//! ==============================================================================

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

use crate::domain::SampleResult;
use crate::store::{element_column, StoreError, ELEMENTS, INSERT_ELEMENTS_SQL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermark {
    pub time_stamp: DateTime<Utc>,
    pub source_machine: i64,
}

impl Watermark {
    /// `None` is the empty store: everything is admitted.
    pub fn admits(watermark: Option<&Watermark>, r: &SampleResult) -> bool {
        let Some(w) = watermark else { return true };
        let (time_stamp, machine) = r.event_key();
        if time_stamp < w.time_stamp {
            return false;
        }
        !(time_stamp == w.time_stamp && machine == w.source_machine)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub skipped: usize,
}

pub fn read_watermark(tx: &Transaction) -> Result<Option<Watermark>, StoreError> {
    let row = tx
        .query_row(
            "SELECT test_time, spectro_machine FROM test_samples ORDER BY id DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    Ok(row.map(|(nanos, machine)| Watermark {
        time_stamp: from_nanos(nanos),
        source_machine: machine,
    }))
}

/// `results` arrives newest first.
pub fn ingest(tx: &Transaction, results: &[SampleResult]) -> Result<IngestReport, StoreError> {
    let watermark = read_watermark(tx)?;
    let mut report = IngestReport::default();

    let mut insert_sample = tx.prepare_cached(
        "INSERT INTO test_samples (test_time, spectro_machine, furnace_name, sample_name)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut insert_elements = tx.prepare_cached(INSERT_ELEMENTS_SQL)?;

    for r in results.iter().rev() {
        if !Watermark::admits(watermark.as_ref(), r) {
            report.skipped += 1;
            continue;
        }

        insert_sample.execute(params![
            to_nanos(r.time_stamp)?,
            r.source_machine,
            r.furnace,
            r.sample_name
        ])?;
        let id = tx.last_insert_rowid();

        insert_elements.execute(params_from_iter(element_row(id, r)))?;
        report.inserted += 1;
    }

    Ok(report)
}

/// id followed by one value per known element column, NULL where absent.
fn element_row(id: i64, r: &SampleResult) -> Vec<Value> {
    let mut row = vec![Value::Null; ELEMENTS.len() + 1];
    row[0] = Value::Integer(id);
    for e in &r.elements {
        match element_column(&e.element) {
            Some(col) => row[col + 1] = Value::Real(e.value),
            None => tracing::warn!(
                "sample {} has unknown element {:?}, not stored",
                r.sample_name, e.element
            ),
        }
    }
    row
}

pub(crate) fn to_nanos(ts: DateTime<Utc>) -> Result<i64, StoreError> {
    ts.timestamp_nanos_opt().ok_or(StoreError::Timestamp(ts))
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}
