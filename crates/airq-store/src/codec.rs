//! Line format shared by the CSV sink and CSV exports.
//!
//! One record per row, twelve fields in a fixed order (see [`HEADER`]).
//! Floats are written in their shortest round-trip form so a value read
//! back is bit-for-bit the value written.

use std::io::Write;

use airq_types::{Record, timestamp};
use csv::StringRecord;

/// Column names, in on-disk order.
pub const HEADER: [&str; 12] = [
    "timestamp",
    "device_id",
    "temperature",
    "humidity",
    "co_ppm",
    "h2_ppm",
    "butane_ppm",
    "alert",
    "co_alert",
    "butane_alert",
    "temperature_alert",
    "humidity_alert",
];

/// Render a record as its twelve fields.
pub fn encode(record: &Record) -> [String; 12] {
    [
        timestamp::format(record.timestamp),
        record.device_id.clone(),
        record.temperature.to_string(),
        record.humidity.to_string(),
        record.co_ppm.to_string(),
        record.h2_ppm.to_string(),
        record.butane_ppm.to_string(),
        record.alert.to_string(),
        record.co_alert.to_string(),
        record.butane_alert.to_string(),
        record.temperature_alert.to_string(),
        record.humidity_alert.to_string(),
    ]
}

/// Parse a row back into a record, positionally.
pub fn decode(row: &StringRecord) -> Result<Record, String> {
    if row.len() != HEADER.len() {
        return Err(format!("expected {} fields, found {}", HEADER.len(), row.len()));
    }

    let ts = timestamp::parse(&row[0]).map_err(|e| format!("timestamp: {}", e))?;

    Ok(Record {
        timestamp: ts,
        device_id: row[1].to_string(),
        temperature: parse_f64(row, 2)?,
        humidity: parse_f64(row, 3)?,
        co_ppm: parse_f64(row, 4)?,
        h2_ppm: parse_f64(row, 5)?,
        butane_ppm: parse_f64(row, 6)?,
        alert: parse_bool(row, 7)?,
        co_alert: parse_bool(row, 8)?,
        butane_alert: parse_bool(row, 9)?,
        temperature_alert: parse_bool(row, 10)?,
        humidity_alert: parse_bool(row, 11)?,
    })
}

fn parse_f64(row: &StringRecord, idx: usize) -> Result<f64, String> {
    row[idx]
        .trim()
        .parse()
        .map_err(|_| format!("{}: invalid number '{}'", HEADER[idx], &row[idx]))
}

// Older files were written with capitalized booleans.
fn parse_bool(row: &StringRecord, idx: usize) -> Result<bool, String> {
    let value = row[idx].trim();
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("{}: invalid boolean '{}'", HEADER[idx], value))
    }
}

/// Whether a row is the header row.
pub fn is_header(row: &StringRecord) -> bool {
    row.iter().eq(HEADER.iter().copied())
}

/// Write rows for `records`, optionally preceded by the header.
pub fn write_rows<W: Write>(out: W, records: &[Record], with_header: bool) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    if with_header {
        writer.write_record(HEADER)?;
    }
    for record in records {
        writer.write_record(encode(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Render records as a complete CSV document with header.
pub fn to_csv(records: &[Record]) -> csv::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_rows(&mut buf, records, true)?;
    Ok(buf)
}
