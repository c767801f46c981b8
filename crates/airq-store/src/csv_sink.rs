//! Append-only CSV file backend.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use airq_types::Record;
use csv::StringRecord;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, RecordStore};
use crate::codec;
use crate::error::{Error, Result};

/// Length to truncate to when the file does not end on a row boundary.
///
/// Returns the offset just past the last newline, or `0` when there is none.
fn torn_tail(file: &mut File, len: u64) -> io::Result<Option<u64>> {
    const CHUNK: u64 = 4096;

    let mut buf = vec![0u8; CHUNK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if end == len && chunk.last() == Some(&b'\n') {
            return Ok(None);
        }
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(Some(start + pos as u64 + 1));
        }
        end = start;
    }
    Ok((len > 0).then_some(0))
}

/// Append-only line file with a fixed header row.
///
/// Prior content is never rewritten. The sink has no eviction capability;
/// [`RecordStore::delete_oldest`] returns [`Error::Unsupported`].
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// Open or create a sink at the given path.
    ///
    /// A missing or empty file gets the header row. An existing file whose
    /// first row is not the expected header is refused. A partial last row
    /// left by an interrupted write is cut off before anything is appended.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening CSV sink at {}", path.display());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(Error::io_read)?;

        let mut len = file.metadata().map_err(Error::io_read)?.len();
        if let Some(end) = torn_tail(&mut file, len).map_err(Error::io_read)? {
            warn!(
                "Discarding {} bytes of incomplete trailing row in {}",
                len - end,
                path.display()
            );
            file.set_len(end).map_err(Error::io_write)?;
            file.sync_data().map_err(Error::io_write)?;
            len = end;
        }

        if len == 0 {
            codec::write_rows(&mut file, &[], true).map_err(|e| match e.into_kind() {
                csv::ErrorKind::Io(io) => Error::io_write(io),
                other => Error::WriteRejected(format!("{:?}", other)),
            })?;
            file.sync_data().map_err(Error::io_write)?;
            debug!("Wrote header to new sink {}", path.display());
        } else {
            file.seek(SeekFrom::Start(0)).map_err(Error::io_read)?;
            let mut first = String::new();
            BufReader::new(file)
                .read_line(&mut first)
                .map_err(Error::io_read)?;
            let row = StringRecord::from(first.trim_end().split(',').collect::<Vec<_>>());
            if !codec::is_header(&row) {
                return Err(Error::Unavailable(format!(
                    "{} does not start with the expected header",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<csv::Reader<File>> {
        let file = File::open(&self.path).map_err(Error::io_read)?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file))
    }

    /// Walk every row, handing `(line, row)` to `f`.
    fn for_each_row<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &StringRecord) -> Result<()>,
    {
        let mut reader = self.reader()?;
        let mut row = StringRecord::new();
        loop {
            match reader.read_record(&mut row) {
                Ok(true) => {
                    let line = row.position().map(|p| p.line()).unwrap_or(0);
                    f(line, &row)?;
                }
                Ok(false) => return Ok(()),
                Err(e) => return Err(Error::csv_read(e)),
            }
        }
    }
}

fn decode_at(line: u64, row: &StringRecord) -> Result<Record> {
    codec::decode(row).map_err(|message| Error::MalformedRecord { line, message })
}

impl RecordStore for CsvSink {
    fn kind(&self) -> BackendKind {
        BackendKind::AppendSink
    }

    fn append(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::new();
        codec::write_rows(&mut batch, records, false)
            .map_err(|e| Error::WriteRejected(e.to_string()))?;

        // Opening without `create` so a vanished sink is reported, not silently recreated
        // without its header.
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(Error::io_write)?;
        let original_len = file.metadata().map_err(Error::io_write)?.len();

        let written = file
            .write_all(&batch)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());

        if let Err(e) = written {
            // Roll back a partially written batch.
            if let Err(trunc) = file.set_len(original_len) {
                warn!(
                    "Failed to truncate {} back to {} bytes: {}",
                    self.path.display(),
                    original_len,
                    trunc
                );
            }
            return Err(Error::io_write(e));
        }

        debug!("Appended {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn latest(&self, device_id: Option<&str>) -> Result<Option<Record>> {
        let mut last: Option<(u64, StringRecord)> = None;
        self.for_each_row(|line, row| {
            let matches = device_id.is_none_or(|id| row.get(1) == Some(id));
            if matches {
                last = Some((line, row.clone()));
            }
            Ok(())
        })?;

        last.map(|(line, row)| decode_at(line, &row)).transpose()
    }

    fn all(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.for_each_row(|line, row| {
            records.push(decode_at(line, row)?);
            Ok(())
        })?;
        Ok(records)
    }

    fn count(&self, device_id: Option<&str>) -> Result<u64> {
        let mut count = 0;
        self.for_each_row(|_, row| {
            if device_id.is_none_or(|id| row.get(1) == Some(id)) {
                count += 1;
            }
            Ok(())
        })?;
        Ok(count)
    }

    fn delete_oldest(&mut self, _device_id: &str, _n: u64) -> Result<u64> {
        Err(Error::Unsupported {
            backend: self.kind().name(),
            operation: "delete_oldest",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airq_types::{AlertVector, Reading};
    use time::{Duration, OffsetDateTime};

    fn record(device: &str, co: f64, offset_secs: i64) -> Record {
        Record::new(
            OffsetDateTime::UNIX_EPOCH + Duration::days(19_000) + Duration::seconds(offset_secs),
            Reading::builder(device)
                .temperature(21.5)
                .humidity(40.0)
                .co_ppm(co)
                .build(),
            AlertVector::default(),
        )
    }

    fn open_temp() -> (tempfile::TempDir, CsvSink) {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::open(dir.path().join("data.csv")).unwrap();
        (dir, sink)
    }

    #[test]
    fn test_new_sink_has_header_only() {
        let (_dir, sink) = open_temp();
        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("timestamp,device_id,"));
        assert_eq!(sink.count(None).unwrap(), 0);
    }

    #[test]
    fn test_latest_on_empty_sink_is_none() {
        let (_dir, sink) = open_temp();
        assert!(sink.latest(None).unwrap().is_none());
        assert!(sink.latest(Some("a")).unwrap().is_none());
    }

    #[test]
    fn test_append_preserves_order_and_prior_content() {
        let (_dir, mut sink) = open_temp();
        sink.append(&[record("a", 1.0, 0), record("b", 2.0, 1)]).unwrap();
        sink.append(&[record("a", 3.0, 2)]).unwrap();

        let all = sink.all().unwrap();
        let cos: Vec<f64> = all.iter().map(|r| r.co_ppm).collect();
        assert_eq!(cos, vec![1.0, 2.0, 3.0]);
        assert_eq!(all[0], record("a", 1.0, 0));
    }

    #[test]
    fn test_latest_with_device_filter() {
        let (_dir, mut sink) = open_temp();
        sink.append(&[record("a", 1.0, 0), record("b", 2.0, 1), record("a", 3.0, 2), record("b", 4.0, 3)])
            .unwrap();

        assert_eq!(sink.latest(None).unwrap().unwrap().co_ppm, 4.0);
        assert_eq!(sink.latest(Some("a")).unwrap().unwrap().co_ppm, 3.0);
        assert!(sink.latest(Some("c")).unwrap().is_none());
        assert_eq!(sink.count(Some("b")).unwrap(), 2);
    }

    #[test]
    fn test_recent_scans_newest_first() {
        let (_dir, mut sink) = open_temp();
        sink.append(&[record("a", 1.0, 0), record("b", 2.0, 1), record("a", 3.0, 2)])
            .unwrap();

        let recent: Vec<f64> = sink.recent(Some("a"), 1).unwrap().iter().map(|r| r.co_ppm).collect();
        assert_eq!(recent, vec![3.0]);
        assert_eq!(sink.recent(None, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_reopen_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.append(&[record("a", 1.0, 0)]).unwrap();
        }
        let sink = CsvSink::open(&path).unwrap();
        assert_eq!(sink.count(None).unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("timestamp,device_id").count(), 1);
    }

    #[test]
    fn test_reopen_discards_partial_trailing_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.append(&[record("a", 1.0, 0)]).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "2024-05-01T12:00:00.000000,a,21").unwrap();
        drop(file);

        let mut sink = CsvSink::open(&path).unwrap();
        sink.append(&[record("a", 2.0, 10)]).unwrap();

        let all = sink.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].co_ppm, 1.0);
        assert_eq!(all[1].co_ppm, 2.0);
        assert_eq!(sink.latest(None).unwrap().unwrap().co_ppm, 2.0);
        assert_eq!(sink.latest(Some("a")).unwrap().unwrap().co_ppm, 2.0);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_reopen_rewrites_partial_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "timestamp,dev").unwrap();

        let mut sink = CsvSink::open(&path).unwrap();
        sink.append(&[record("a", 1.0, 0)]).unwrap();
        assert_eq!(sink.count(None).unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("timestamp,device_id").count(), 1);
    }

    #[test]
    fn test_foreign_header_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        let err = CsvSink::open(&path).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_missing_sink_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path().join("sub").join("data.csv")).unwrap();
        std::fs::remove_dir_all(dir.path().join("sub")).unwrap();

        let err = sink.append(&[record("a", 1.0, 0)]).unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");
        assert!(sink.latest(None).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_delete_oldest_unsupported() {
        let (_dir, mut sink) = open_temp();
        let err = sink.delete_oldest("a", 1).unwrap_err();
        assert!(matches!(err, Error::Unsupported { backend: "csv", .. }));
    }

    #[test]
    fn test_malformed_row_reported_with_line() {
        let (_dir, mut sink) = open_temp();
        sink.append(&[record("a", 1.0, 0)]).unwrap();
        let mut file = OpenOptions::new().append(true).open(sink.path()).unwrap();
        writeln!(file, "not,a,record").unwrap();

        let err = sink.all().unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 3, .. }), "got {err}");
    }

    #[test]
    fn test_latest_for_device_skips_unrelated_bad_rows() {
        let (_dir, mut sink) = open_temp();
        sink.append(&[record("a", 1.0, 0)]).unwrap();
        let mut file = OpenOptions::new().append(true).open(sink.path()).unwrap();
        writeln!(file, "garbage,b,x,y,z,1,2,3,4,5,6,7").unwrap();

        assert_eq!(sink.latest(Some("a")).unwrap().unwrap().co_ppm, 1.0);
    }
}
