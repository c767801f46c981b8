//! Ingestion pipeline and read path.
//!
//! Every accepted reading is validated, evaluated against the alert
//! thresholds and stamped with the ingestion time. What happens next depends
//! on the backend:
//!
//! - Backends that stage writes (the CSV sink) get the record appended to an
//!   in-memory pending queue. The queue is flushed to the store as one batch
//!   when it reaches `flush_size`, on every scheduler tick, and at shutdown.
//! - Transactional backends get the record written immediately, followed by
//!   retention enforcement for its device.
//!
//! # Flush semantics
//!
//! A flush copies the pending queue, appends the copy, and only removes the
//! records from the queue once the store has confirmed the batch. A failed
//! flush leaves the queue untouched so the next flush retries the same
//! records. Because the store commits a batch entirely or not at all, every
//! accepted record is persisted exactly once while the process lives.
//!
//! # Locking
//!
//! Locks are always taken in the order flush lock, store, pending queue.
//! Readers take the store and then the pending queue, so a record being
//! flushed is visible in exactly one of the two places.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use airq_store::{BackendKind, RecordStore, RetentionPolicy};
use airq_types::{Reading, Record, ThresholdConfig, ValidationError};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::config::BufferConfig;

/// Errors returned to callers of the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The reading failed validation and was not recorded.
    #[error("Invalid reading: {0}")]
    Validation(#[from] ValidationError),

    /// Too many records are waiting for a flush.
    #[error("Ingestion buffer is full ({capacity} records pending)")]
    BufferFull { capacity: usize },

    /// The store failed the operation.
    #[error(transparent)]
    Store(#[from] airq_store::Error),
}

/// Outcome of a successful [`Ingestor::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Staged in memory, with this many records now awaiting a flush.
    Buffered { pending: usize },
    /// Durable in the store; `evicted` old records were dropped to honor retention.
    Stored { evicted: u64 },
}

/// Where a record returned by the read path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Buffer,
    Store,
}

/// The most recent record and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Latest {
    pub record: Record,
    pub source: Source,
}

/// Running counters for the pipeline.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    flushes: AtomicU64,
    flushed_records: AtomicU64,
    failed_flushes: AtomicU64,
    skipped_ticks: AtomicU64,
    evicted: AtomicU64,
    retention_failures: AtomicU64,
}

impl IngestStats {
    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_records: self.flushed_records.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            retention_failures: self.retention_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Readings accepted since startup.
    pub accepted: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Records written by successful flushes.
    pub flushed_records: u64,
    pub failed_flushes: u64,
    /// Scheduler ticks skipped because a flush was already running.
    pub skipped_ticks: u64,
    /// Records removed by retention.
    pub evicted: u64,
    pub retention_failures: u64,
}

/// The most recent flush failure.
#[derive(Debug, Clone, Serialize)]
pub struct FlushFailure {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub records: usize,
    pub message: String,
}

/// Pipeline status reported by `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub backend: BackendKind,
    pub pending: usize,
    pub flush_size: usize,
    pub max_pending: usize,
    pub stats: StatsSnapshot,
    pub last_flush_failure: Option<FlushFailure>,
}

/// Accepts readings and serves reads across the pending queue and the store.
pub struct Ingestor {
    kind: BackendKind,
    store: Mutex<Box<dyn RecordStore>>,
    pending: Mutex<VecDeque<Record>>,
    /// Held for the whole duration of a flush.
    flush_lock: Mutex<()>,
    thresholds: ThresholdConfig,
    retention: RetentionPolicy,
    flush_size: usize,
    max_pending: usize,
    stats: IngestStats,
    last_flush_failure: RwLock<Option<FlushFailure>>,
}

impl Ingestor {
    /// Create an ingestor writing to `store`.
    pub fn new(
        store: Box<dyn RecordStore>,
        thresholds: ThresholdConfig,
        retention: RetentionPolicy,
        buffer: &BufferConfig,
    ) -> Self {
        let kind = store.kind();
        Self {
            kind,
            store: Mutex::new(store),
            pending: Mutex::new(VecDeque::new()),
            flush_lock: Mutex::new(()),
            thresholds,
            retention,
            flush_size: buffer.flush_size.max(1),
            max_pending: buffer.max_pending,
            stats: IngestStats::default(),
            last_flush_failure: RwLock::new(None),
        }
    }

    /// The kind of backend records are written to.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The thresholds alerts are evaluated against.
    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Pipeline counters.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Number of records awaiting a flush.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Validate, evaluate and record a reading.
    ///
    /// For staging backends, reaching `flush_size` triggers a flush before
    /// this returns. A failure of that flush is not an error for the caller:
    /// the record stays pending and is retried by the next flush.
    pub async fn accept(&self, reading: Reading) -> Result<Accepted, IngestError> {
        reading.validate()?;

        if self.kind.stages_writes() {
            self.stage(reading).await
        } else {
            self.persist(reading).await
        }
    }

    /// Stamp and evaluate a reading. Callers hold the lock that orders
    /// records, so insertion order and timestamp order agree.
    fn capture(&self, reading: Reading) -> Record {
        let record = Record::capture(reading, &self.thresholds);
        if record.alert {
            debug!(
                "Alert from {}: co={} butane={} temperature={} humidity={}",
                record.device_id,
                record.co_alert,
                record.butane_alert,
                record.temperature_alert,
                record.humidity_alert
            );
        }
        record
    }

    async fn stage(&self, reading: Reading) -> Result<Accepted, IngestError> {
        let pending = {
            let mut pending = self.pending.lock().await;
            if pending.len() >= self.max_pending {
                warn!(
                    "Refusing reading from {}: {} records already pending",
                    reading.device_id,
                    pending.len()
                );
                return Err(IngestError::BufferFull {
                    capacity: self.max_pending,
                });
            }
            pending.push_back(self.capture(reading));
            pending.len()
        };
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        if pending < self.flush_size {
            return Ok(Accepted::Buffered { pending });
        }

        debug!("{} records pending, flushing", pending);
        if let Err(e) = self.flush().await {
            warn!("Size-triggered flush failed, records stay pending: {}", e);
        }
        Ok(Accepted::Buffered {
            pending: self.pending_len().await,
        })
    }

    async fn persist(&self, reading: Reading) -> Result<Accepted, IngestError> {
        let mut store = self.store.lock().await;
        let record = self.capture(reading);
        store.append(std::slice::from_ref(&record))?;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let evicted = self.enforce_retention(&mut **store, &record.device_id);
        Ok(Accepted::Stored { evicted })
    }

    /// Retention failures are logged and counted; the triggering write stands.
    fn enforce_retention(&self, store: &mut dyn RecordStore, device_id: &str) -> u64 {
        match self.retention.enforce(store, device_id) {
            Ok(evicted) => {
                self.stats.evicted.fetch_add(evicted, Ordering::Relaxed);
                evicted
            }
            Err(e) => {
                self.stats.retention_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Retention failed for {}: {}", device_id, e);
                0
            }
        }
    }

    /// Flush all pending records, waiting for any flush already in progress.
    ///
    /// Returns the number of records written.
    pub async fn flush(&self) -> Result<usize, IngestError> {
        let guard = self.flush_lock.lock().await;
        self.flush_locked(&guard).await
    }

    /// Flush unless another flush is already running.
    ///
    /// Returns `None` when the tick was skipped.
    pub async fn flush_tick(&self) -> Option<Result<usize, IngestError>> {
        match self.flush_lock.try_lock() {
            Ok(guard) => Some(self.flush_locked(&guard).await),
            Err(_) => {
                self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                debug!("Flush already in progress, skipping tick");
                None
            }
        }
    }

    async fn flush_locked(&self, _guard: &MutexGuard<'_, ()>) -> Result<usize, IngestError> {
        let mut store = self.store.lock().await;
        let batch: Vec<Record> = self.pending.lock().await.iter().cloned().collect();
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = store.append(&batch) {
            self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Failed to flush {} records to {} store: {}",
                batch.len(),
                self.kind.name(),
                e
            );
            *self.last_flush_failure.write().await = Some(FlushFailure {
                at: OffsetDateTime::now_utc(),
                records: batch.len(),
                message: e.to_string(),
            });
            return Err(e.into());
        }

        // Only flushes remove from the front, and we hold the flush lock.
        {
            let mut pending = self.pending.lock().await;
            pending.drain(..batch.len());
        }
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .flushed_records
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        debug!("Flushed {} records to {} store", batch.len(), self.kind.name());

        if self.kind.supports_eviction() {
            let devices: HashSet<&str> = batch.iter().map(|r| r.device_id.as_str()).collect();
            for device_id in devices {
                self.enforce_retention(&mut **store, device_id);
            }
        }

        Ok(batch.len())
    }

    /// The most recent record, optionally for one device.
    ///
    /// Pending records are newer than anything stored, so they are searched
    /// first. `Ok(None)` means no matching record exists anywhere.
    pub async fn latest(&self, device_id: Option<&str>) -> Result<Option<Latest>, IngestError> {
        let store = self.store.lock().await;
        {
            let pending = self.pending.lock().await;
            if let Some(record) = pending
                .iter()
                .rev()
                .find(|r| device_id.is_none_or(|id| r.device_id == id))
            {
                return Ok(Some(Latest {
                    record: record.clone(),
                    source: Source::Buffer,
                }));
            }
        }

        Ok(store.latest(device_id)?.map(|record| Latest {
            record,
            source: Source::Store,
        }))
    }

    /// Up to `limit` of the newest records, newest first.
    pub async fn recent(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>, IngestError> {
        let store = self.store.lock().await;
        let mut records: Vec<Record> = self
            .pending
            .lock()
            .await
            .iter()
            .rev()
            .filter(|r| device_id.is_none_or(|id| r.device_id == id))
            .take(limit)
            .cloned()
            .collect();

        if records.len() < limit {
            records.extend(store.recent(device_id, limit - records.len())?);
        }
        Ok(records)
    }

    /// Every record, stored then pending, oldest first.
    pub async fn download_all(&self) -> Result<Vec<Record>, IngestError> {
        let store = self.store.lock().await;
        let mut records = store.all()?;
        records.extend(self.pending.lock().await.iter().cloned());
        Ok(records)
    }

    /// Current pipeline status.
    pub async fn status(&self) -> IngestStatus {
        IngestStatus {
            backend: self.kind,
            pending: self.pending_len().await,
            flush_size: self.flush_size,
            max_pending: self.max_pending,
            stats: self.stats.snapshot(),
            last_flush_failure: self.last_flush_failure.read().await.clone(),
        }
    }

    /// Final flush before exit.
    ///
    /// Waits for an in-flight flush, then writes whatever is still pending.
    pub async fn shutdown(&self) -> Result<usize, IngestError> {
        let flushed = self.flush().await?;
        if flushed > 0 {
            info!("Flushed {} pending records on shutdown", flushed);
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use airq_store::{CsvSink, SqliteStore};
    use airq_types::AlertVector;
    use time::Duration;

    /// In-memory store whose writes can be made to fail.
    #[derive(Clone)]
    struct MemoryStore {
        kind: BackendKind,
        records: Arc<std::sync::Mutex<Vec<Record>>>,
        failing: Arc<AtomicBool>,
    }

    impl MemoryStore {
        fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                records: Arc::default(),
                failing: Arc::default(),
            }
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    impl RecordStore for MemoryStore {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn append(&mut self, records: &[Record]) -> airq_store::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(airq_store::Error::Unavailable("disk detached".to_string()));
            }
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        fn latest(&self, device_id: Option<&str>) -> airq_store::Result<Option<Record>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .rev()
                .find(|r| device_id.is_none_or(|id| r.device_id == id))
                .cloned())
        }

        fn all(&self) -> airq_store::Result<Vec<Record>> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn count(&self, device_id: Option<&str>) -> airq_store::Result<u64> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| device_id.is_none_or(|id| r.device_id == id))
                .count() as u64)
        }

        fn delete_oldest(&mut self, _device_id: &str, _n: u64) -> airq_store::Result<u64> {
            Err(airq_store::Error::WriteRejected("read-only".to_string()))
        }
    }

    fn buffer(flush_size: usize, max_pending: usize) -> BufferConfig {
        BufferConfig {
            flush_size,
            max_pending,
            ..Default::default()
        }
    }

    fn ingestor(store: impl RecordStore + 'static, flush_size: usize) -> Ingestor {
        Ingestor::new(
            Box::new(store),
            ThresholdConfig::default(),
            RetentionPolicy::default(),
            &buffer(flush_size, 10_000),
        )
    }

    fn reading(device: &str, co: f64) -> Reading {
        Reading::builder(device)
            .temperature(21.5)
            .humidity(45.0)
            .co_ppm(co)
            .h2_ppm(0.2)
            .butane_ppm(1.5)
            .build()
    }

    #[tokio::test]
    async fn test_latest_comes_from_buffer_until_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::open(dir.path().join("data.csv")).unwrap();
        let ingestor = ingestor(sink, 10);

        for i in 0..9 {
            let outcome = ingestor.accept(reading("A", i as f64)).await.unwrap();
            assert_eq!(outcome, Accepted::Buffered { pending: i + 1 });
        }
        let latest = ingestor.latest(Some("A")).await.unwrap().unwrap();
        assert_eq!(latest.source, Source::Buffer);
        assert_eq!(latest.record.co_ppm, 8.0);

        let outcome = ingestor.accept(reading("A", 9.0)).await.unwrap();
        assert_eq!(outcome, Accepted::Buffered { pending: 0 });

        let latest = ingestor.latest(Some("A")).await.unwrap().unwrap();
        assert_eq!(latest.source, Source::Store);
        assert_eq!(latest.record.co_ppm, 9.0);

        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.flushed_records, 10);
    }

    #[tokio::test]
    async fn test_pending_is_accepts_modulo_flush_size() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store.clone(), 4);

        for n in 1..=23usize {
            ingestor.accept(reading("A", n as f64)).await.unwrap();
            assert_eq!(ingestor.pending_len().await, n % 4);
            assert_eq!(store.len(), n - n % 4);
        }
        assert_eq!(ingestor.stats().snapshot().flushes, 5);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_records_pending() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store.clone(), 3);
        store.fail(true);

        for i in 0..3 {
            ingestor.accept(reading("A", i as f64)).await.unwrap();
        }
        assert_eq!(ingestor.pending_len().await, 3);
        assert_eq!(store.len(), 0);

        let status = ingestor.status().await;
        assert_eq!(status.stats.failed_flushes, 1);
        let failure = status.last_flush_failure.unwrap();
        assert_eq!(failure.records, 3);
        assert!(failure.message.contains("disk detached"));

        // Still readable while the store is down
        let latest = ingestor.latest(None).await.unwrap().unwrap();
        assert_eq!(latest.record.co_ppm, 2.0);

        store.fail(false);
        assert_eq!(ingestor.flush().await.unwrap(), 3);
        assert_eq!(ingestor.pending_len().await, 0);
        assert_eq!(ingestor.flush().await.unwrap(), 0);

        let cos: Vec<f64> = store.all().unwrap().iter().map(|r| r.co_ppm).collect();
        assert_eq!(cos, vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_explicit_flush_reports_store_error() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store.clone(), 10);
        ingestor.accept(reading("A", 1.0)).await.unwrap();

        store.fail(true);
        let err = ingestor.flush().await.unwrap_err();
        assert!(matches!(err, IngestError::Store(e) if e.is_unavailable()));
        assert_eq!(ingestor.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_buffer_full_refuses_reading() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        store.fail(true);
        let ingestor = Ingestor::new(
            Box::new(store),
            ThresholdConfig::default(),
            RetentionPolicy::default(),
            &buffer(2, 2),
        );

        ingestor.accept(reading("A", 1.0)).await.unwrap();
        ingestor.accept(reading("A", 2.0)).await.unwrap();
        let err = ingestor.accept(reading("A", 3.0)).await.unwrap_err();
        assert!(matches!(err, IngestError::BufferFull { capacity: 2 }));
        assert_eq!(ingestor.stats().snapshot().accepted, 2);
    }

    #[tokio::test]
    async fn test_tick_skipped_while_flush_in_progress() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store.clone(), 10);
        ingestor.accept(reading("A", 1.0)).await.unwrap();

        {
            let _in_flight = ingestor.flush_lock.lock().await;
            assert!(ingestor.flush_tick().await.is_none());
        }
        assert_eq!(ingestor.stats().snapshot().skipped_ticks, 1);
        assert_eq!(store.len(), 0);

        assert_eq!(ingestor.flush_tick().await.unwrap().unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_on_empty_pipeline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::open(dir.path().join("data.csv")).unwrap();
        let ingestor = ingestor(sink, 10);
        assert!(ingestor.latest(None).await.unwrap().is_none());
        assert!(ingestor.latest(Some("A")).await.unwrap().is_none());

        let ingestor = ingestor_sqlite(SqliteStore::open_in_memory().unwrap(), 1000);
        assert!(ingestor.latest(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_filters_by_device_across_buffer_and_store() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store, 2);
        ingestor.accept(reading("A", 1.0)).await.unwrap();
        ingestor.accept(reading("B", 2.0)).await.unwrap();
        ingestor.accept(reading("B", 3.0)).await.unwrap();

        let a = ingestor.latest(Some("A")).await.unwrap().unwrap();
        assert_eq!((a.source, a.record.co_ppm), (Source::Store, 1.0));
        let b = ingestor.latest(Some("B")).await.unwrap().unwrap();
        assert_eq!((b.source, b.record.co_ppm), (Source::Buffer, 3.0));
    }

    #[tokio::test]
    async fn test_invalid_reading_is_not_recorded() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store, 1);

        let err = ingestor.accept(reading("  ", 1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::EmptyDeviceId)
        ));

        let err = ingestor.accept(reading("A", f64::NAN)).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(ingestor.latest(None).await.unwrap().is_none());
        assert_eq!(ingestor.stats().snapshot().accepted, 0);
    }

    #[tokio::test]
    async fn test_alerts_evaluated_on_accept() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store, 10);
        ingestor.accept(reading("A", 75.0)).await.unwrap();

        let latest = ingestor.latest(None).await.unwrap().unwrap().record;
        assert_eq!(
            latest.alerts(),
            AlertVector {
                alert: true,
                co_alert: true,
                ..Default::default()
            }
        );
    }

    fn ingestor_sqlite(store: SqliteStore, max_per_device: u64) -> Ingestor {
        Ingestor::new(
            Box::new(store),
            ThresholdConfig::default(),
            RetentionPolicy { max_per_device },
            &BufferConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_transactional_accept_enforces_retention() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let base = OffsetDateTime::UNIX_EPOCH + Duration::days(19_000);
        let existing: Vec<Record> = (0..1000)
            .map(|i| {
                Record::new(
                    base + Duration::seconds(i),
                    reading("B", i as f64),
                    AlertVector::default(),
                )
            })
            .collect();
        store.append(&existing).unwrap();

        let ingestor = ingestor_sqlite(store, 1000);
        let outcome = ingestor.accept(reading("B", 5000.0)).await.unwrap();
        assert_eq!(outcome, Accepted::Stored { evicted: 1 });
        assert_eq!(ingestor.pending_len().await, 0);

        let all = ingestor.download_all().await.unwrap();
        assert_eq!(all.len(), 1000);
        assert_eq!(all.first().unwrap().co_ppm, 1.0);
        assert_eq!(all.last().unwrap().co_ppm, 5000.0);

        let latest = ingestor.latest(Some("B")).await.unwrap().unwrap();
        assert_eq!(latest.source, Source::Store);
        assert_eq!(latest.record.co_ppm, 5000.0);
        assert_eq!(ingestor.stats().snapshot().evicted, 1);
    }

    #[tokio::test]
    async fn test_retention_failure_keeps_the_write() {
        let store = MemoryStore::new(BackendKind::Transactional);
        let ingestor = Ingestor::new(
            Box::new(store.clone()),
            ThresholdConfig::default(),
            RetentionPolicy { max_per_device: 1 },
            &BufferConfig::default(),
        );

        ingestor.accept(reading("A", 1.0)).await.unwrap();
        let outcome = ingestor.accept(reading("A", 2.0)).await.unwrap();
        assert_eq!(outcome, Accepted::Stored { evicted: 0 });
        assert_eq!(store.len(), 2);
        assert_eq!(ingestor.stats().snapshot().retention_failures, 1);
    }

    #[tokio::test]
    async fn test_download_all_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::open(dir.path().join("data.csv")).unwrap();
        let ingestor = ingestor(sink, 2);

        let readings = vec![
            Reading::builder("kitchen")
                .temperature(-3.125)
                .humidity(99.9)
                .co_ppm(0.1 + 0.2)
                .h2_ppm(1e-9)
                .butane_ppm(12.0)
                .build(),
            Reading::builder("garage, north")
                .temperature(31.0)
                .humidity(10.0)
                .build(),
            reading("kitchen", 51.0),
        ];
        for r in &readings {
            ingestor.accept(r.clone()).await.unwrap();
        }
        assert_eq!(ingestor.pending_len().await, 1);

        let all = ingestor.download_all().await.unwrap();
        let back: Vec<Reading> = all.iter().map(Record::reading).collect();
        assert_eq!(back, readings);
        assert!(all[1].alert);
        assert!(all[0].butane_alert);

        // Everything is still there, once, after the final flush
        ingestor.shutdown().await.unwrap();
        assert_eq!(ingestor.download_all().await.unwrap(), all);
    }

    #[tokio::test]
    async fn test_recent_merges_buffer_then_store() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = ingestor(store, 3);
        for i in 0..5 {
            ingestor.accept(reading("A", i as f64)).await.unwrap();
        }
        ingestor.accept(reading("B", 9.0)).await.unwrap();

        let cos: Vec<f64> = ingestor
            .recent(Some("A"), 4)
            .await
            .unwrap()
            .iter()
            .map(|r| r.co_ppm)
            .collect();
        assert_eq!(cos, vec![4.0, 3.0, 2.0, 1.0]);
        assert_eq!(ingestor.recent(None, 100).await.unwrap().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_accepts_persist_each_record_once() {
        let store = MemoryStore::new(BackendKind::AppendSink);
        let ingestor = Arc::new(ingestor(store.clone(), 7));

        let ticker = {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = ingestor.flush_tick().await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut tasks = Vec::new();
        for d in 0..8 {
            let ingestor = Arc::clone(&ingestor);
            tasks.push(tokio::spawn(async move {
                let device = format!("dev-{d}");
                for i in 0..25 {
                    ingestor.accept(reading(&device, i as f64)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        ticker.await.unwrap();
        ingestor.shutdown().await.unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 200);
        for d in 0..8 {
            let device = format!("dev-{d}");
            let cos: Vec<f64> = all
                .iter()
                .filter(|r| r.device_id == device)
                .map(|r| r.co_ppm)
                .collect();
            let expected: Vec<f64> = (0..25).map(|i| i as f64).collect();
            assert_eq!(cos, expected, "{device}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_accepts_store_in_timestamp_order() {
        for kind in [BackendKind::AppendSink, BackendKind::Transactional] {
            let store = MemoryStore::new(kind);
            let ingestor = Arc::new(ingestor(store.clone(), 5));

            let mut tasks = Vec::new();
            for d in 0..8 {
                let ingestor = Arc::clone(&ingestor);
                tasks.push(tokio::spawn(async move {
                    let device = format!("dev-{d}");
                    for i in 0..25 {
                        ingestor.accept(reading(&device, i as f64)).await.unwrap();
                    }
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }
            ingestor.shutdown().await.unwrap();

            let all = store.all().unwrap();
            assert_eq!(all.len(), 200, "{kind:?}");
            assert!(
                all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
                "{kind:?} stored out of timestamp order"
            );
        }
    }
}
