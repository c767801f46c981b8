//! SQLite transactional backend.

use std::path::Path;

use rusqlite::{Connection, Row, params, params_from_iter};
use time::OffsetDateTime;
use tracing::{debug, info};

use airq_types::Record;

use crate::backend::{BackendKind, RecordStore};
use crate::error::{Error, Result};
use crate::models::StoredRecord;
use crate::queries::RecordQuery;
use crate::schema;

/// Column list shared by every record SELECT; `row_to_stored` reads in this order.
pub(crate) const COLUMNS: &str = "id, timestamp, device_id, temperature, humidity, co_ppm, \
     h2_ppm, butane_ppm, alert, co_alert, butane_alert, temperature_alert, humidity_alert";

pub(crate) fn to_micros(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000) as i64
}

fn from_micros(us: i64) -> std::result::Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(us) * 1_000)
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let us: i64 = row.get(1)?;
    let timestamp = from_micros(us).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
    })?;

    Ok(StoredRecord {
        id: row.get(0)?,
        record: Record {
            timestamp,
            device_id: row.get(2)?,
            temperature: row.get(3)?,
            humidity: row.get(4)?,
            co_ppm: row.get(5)?,
            h2_ppm: row.get(6)?,
            butane_ppm: row.get(7)?,
            alert: row.get(8)?,
            co_alert: row.get(9)?,
            butane_alert: row.get(10)?,
            temperature_alert: row.get(11)?,
            humidity_alert: row.get(12)?,
        },
    })
}

/// Newest-first query for `recent` and `latest`; a device filter seeks the
/// `(device_id, timestamp)` index.
fn recent_query(device_id: Option<&str>, limit: usize) -> RecordQuery {
    let query = RecordQuery::new().limit(u32::try_from(limit).unwrap_or(u32::MAX));
    match device_id {
        Some(id) => query.device(id),
        None => query,
    }
}

fn count_sql(device_id: Option<&str>) -> &'static str {
    match device_id {
        Some(_) => "SELECT COUNT(*) FROM records WHERE device_id = ?1",
        None => "SELECT COUNT(*) FROM records",
    }
}

/// SQLite-based store. Every append is a committed transaction on return.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path).map_err(Error::sqlite_read)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(Error::sqlite_read)?;

        schema::initialize(&conn).map_err(Error::sqlite_read)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::sqlite_read)?;
        schema::initialize(&conn).map_err(Error::sqlite_read)?;
        Ok(Self { conn })
    }

    /// Query records with filters.
    pub fn query_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql).map_err(Error::sqlite_read)?;
        let records = stmt
            .query_map(params_ref.as_slice(), row_to_stored)
            .map_err(Error::sqlite_read)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::sqlite_read)?;

        Ok(records)
    }

    /// Distinct device identifiers with stored records.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT device_id FROM records ORDER BY device_id")
            .map_err(Error::sqlite_read)?;
        let devices = stmt
            .query_map([], |row| row.get(0))
            .map_err(Error::sqlite_read)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(Error::sqlite_read)?;
        Ok(devices)
    }
}

impl RecordStore for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Transactional
    }

    fn append(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction().map_err(Error::sqlite_write)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO records (timestamp, device_id, temperature, humidity, co_ppm,
                     h2_ppm, butane_ppm, alert, co_alert, butane_alert, temperature_alert,
                     humidity_alert)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .map_err(Error::sqlite_write)?;

            for record in records {
                stmt.execute(params![
                    to_micros(record.timestamp),
                    record.device_id,
                    record.temperature,
                    record.humidity,
                    record.co_ppm,
                    record.h2_ppm,
                    record.butane_ppm,
                    record.alert,
                    record.co_alert,
                    record.butane_alert,
                    record.temperature_alert,
                    record.humidity_alert,
                ])
                .map_err(Error::sqlite_write)?;
            }
        }
        tx.commit().map_err(Error::sqlite_write)?;

        debug!("Inserted {} records", records.len());
        Ok(())
    }

    fn latest(&self, device_id: Option<&str>) -> Result<Option<Record>> {
        Ok(self.recent(device_id, 1)?.into_iter().next())
    }

    fn all(&self) -> Result<Vec<Record>> {
        let query = RecordQuery::new().oldest_first();
        Ok(self
            .query_records(&query)?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<Record>> {
        Ok(self
            .query_records(&recent_query(device_id, limit))?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    fn count(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(count_sql(device_id), params_from_iter(device_id), |row| {
                row.get(0)
            })
            .map_err(Error::sqlite_read)?;
        Ok(count as u64)
    }

    fn delete_oldest(&mut self, device_id: &str, n: u64) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }

        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let tx = self.conn.transaction().map_err(Error::sqlite_write)?;
        let deleted = tx
            .execute(
                "DELETE FROM records WHERE id IN (
                     SELECT id FROM records WHERE device_id = ?1
                     ORDER BY timestamp ASC, id ASC LIMIT ?2
                 )",
                params![device_id, limit],
            )
            .map_err(Error::sqlite_write)?;
        tx.commit().map_err(Error::sqlite_write)?;

        debug!("Deleted {} oldest records for {}", deleted, device_id);
        Ok(deleted as u64)
    }
}
