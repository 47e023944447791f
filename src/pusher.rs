//! Background batching of log records.
//!
//! A [`Pusher`] owns one dedicated thread that accumulates records pushed by
//! any number of producers and flushes them when either:
//! - the batch reaches `batch_max_size` records (size-based flush)
//! - `batch_max_wait` elapses since the last flush decision (time-based flush)
//!
//! Producers hand records over through a bounded synchronous channel, so a
//! stalled flush can only ever hold back `handoff_capacity` records before
//! producers wait. Flushes run one at a time on the pusher thread, which
//! keeps batches in creation order. A failed flush is logged and the batch is
//! dropped; nothing is retried.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ClientError, LokiClient};
use crate::config::Config;
use crate::encoder::encode;
use crate::record::{Batch, Record};

/// Name of the background thread.
pub const PUSHER_THREAD_NAME: &str = "loki-pusher";

/// Upper bound on the buffer capacity reserved up front.
const MAX_PREALLOCATED_RECORDS: usize = 1024;

/// Error returned by a flush path.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

thread_local! {
    static ON_PUSHER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is a pusher's background thread.
///
/// Anything logged from there is pusher or transport diagnostics and must not
/// be shipped back into the pipeline.
pub fn on_pusher_thread() -> bool {
    ON_PUSHER_THREAD.with(Cell::get)
}

/// Errors that can occur while starting a pusher.
#[derive(Debug, Error)]
pub enum PusherError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to build pusher runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to spawn pusher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Batching thresholds for a pusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PusherSettings {
    /// Number of records that triggers an immediate flush
    pub batch_max_size: usize,

    /// Longest time a non-empty batch waits before it is flushed
    pub batch_max_wait: Duration,

    /// Capacity of the producer hand-off channel
    pub handoff_capacity: usize,
}

impl PusherSettings {
    pub fn new(batch_max_size: usize, batch_max_wait: Duration) -> Self {
        Self {
            batch_max_size,
            batch_max_wait,
            handoff_capacity: crate::config::DEFAULT_HANDOFF_CAPACITY,
        }
    }
}

impl Default for PusherSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PusherSettings {
    fn from(config: &Config) -> Self {
        let config = config.clone().normalized();
        Self {
            batch_max_size: config.batch_max_size,
            batch_max_wait: config.batch_max_wait,
            handoff_capacity: config.handoff_capacity,
        }
    }
}

/// Snapshot of pusher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PusherStats {
    /// Records accepted into a batch
    pub records_received: u64,

    /// Records handed to the flush path
    pub records_flushed: u64,

    /// Flushes that succeeded
    pub batches_sent: u64,

    /// Flushes that failed; their records were dropped
    pub batches_failed: u64,

    /// Flushes triggered by the size threshold
    pub size_flushes: u64,

    /// Flushes triggered by the wait deadline
    pub time_flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    records_received: AtomicU64,
    records_flushed: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    size_flushes: AtomicU64,
    time_flushes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PusherStats {
        PusherStats {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            time_flushes: self.time_flushes.load(Ordering::Relaxed),
        }
    }
}

enum Message {
    Record(Record),
    Shutdown,
}

/// Handle to a running background pusher.
///
/// `Pusher` is `Sync`; share it behind an `Arc` to push from several threads.
///
/// # Example
///
/// ```no_run
/// use loki_shipper::config::Config;
/// use loki_shipper::pusher::Pusher;
/// use loki_shipper::record::Record;
///
/// let pusher = Pusher::new(Config::default()).expect("Failed to start pusher");
/// pusher.push(Record::new("info", "level=info msg=started"));
/// pusher.shutdown();
/// ```
pub struct Pusher {
    tx: SyncSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    settings: PusherSettings,
}

impl Pusher {
    /// Start a pusher that encodes each batch and sends it to Loki.
    ///
    /// # Errors
    ///
    /// Returns `PusherError` if the HTTP client, the runtime driving it, or
    /// the background thread cannot be created.
    pub fn new(config: Config) -> Result<Self, PusherError> {
        let config = config.normalized();
        let client = LokiClient::new(&config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PusherError::Runtime)?;
        let settings = PusherSettings::from(&config);
        let labels = config.labels;

        info!(
            url = %client.push_url(),
            batch_max_size = settings.batch_max_size,
            batch_max_wait_ms = settings.batch_max_wait.as_millis() as u64,
            labels = labels.len(),
            "Starting Loki pusher"
        );

        Self::with_flusher(settings, move |batch: Batch| {
            let request = encode(&batch, &labels);
            runtime.block_on(client.send(&request))?;
            Ok(())
        })
    }

    /// Start a pusher with a custom flush path.
    ///
    /// `flusher` runs on the pusher thread, once per batch, never concurrently.
    pub fn with_flusher<F>(settings: PusherSettings, flusher: F) -> Result<Self, PusherError>
    where
        F: FnMut(Batch) -> Result<(), BoxError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(settings.handoff_capacity);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            rx,
            settings,
            counters: counters.clone(),
            flusher,
            buffer: Vec::with_capacity(preallocation(&settings)),
        };

        let handle = thread::Builder::new()
            .name(PUSHER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(PusherError::Spawn)?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(handle)),
            counters,
            settings,
        })
    }

    /// Hand a record to the pusher.
    ///
    /// Blocks only while the hand-off channel is full. Records pushed after
    /// shutdown, or from the pusher thread itself, are discarded.
    pub fn push(&self, record: Record) {
        // No logging here: push is reached from inside tracing layers.
        if on_pusher_thread() {
            return;
        }
        let _ = self.tx.send(Message::Record(record));
    }

    /// Stop the pusher, flushing any partial batch first.
    ///
    /// Blocks until the final flush attempt has finished. Later calls return
    /// immediately.
    pub fn shutdown(&self) {
        if on_pusher_thread() {
            return;
        }

        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // A send error means the thread is already gone; join reports why.
        let _ = self.tx.send(Message::Shutdown);
        if handle.join().is_err() {
            warn!("Loki pusher thread panicked");
        }
    }

    /// Get current pusher statistics.
    pub fn stats(&self) -> PusherStats {
        self.counters.snapshot()
    }

    /// Get the batching settings.
    pub fn settings(&self) -> &PusherSettings {
        &self.settings
    }
}

impl Drop for Pusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn preallocation(settings: &PusherSettings) -> usize {
    settings.batch_max_size.min(MAX_PREALLOCATED_RECORDS)
}

/// State owned by the pusher thread.
struct Worker<F> {
    rx: Receiver<Message>,
    settings: PusherSettings,
    counters: Arc<Counters>,
    flusher: F,
    buffer: Vec<Record>,
}

impl<F> Worker<F>
where
    F: FnMut(Batch) -> Result<(), BoxError>,
{
    fn run(mut self) {
        ON_PUSHER_THREAD.with(|flag| flag.set(true));

        let wait = self.settings.batch_max_wait;
        let mut deadline = Instant::now() + wait;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(Message::Record(record)) => {
                    Counters::bump(&self.counters.records_received, 1);
                    self.buffer.push(record);

                    if self.buffer.len() >= self.settings.batch_max_size {
                        Counters::bump(&self.counters.size_flushes, 1);
                        debug!(
                            batch_size = self.buffer.len(),
                            "Flushing batch: size threshold reached"
                        );
                        self.flush();
                        deadline = Instant::now() + wait;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.buffer.is_empty() {
                        Counters::bump(&self.counters.time_flushes, 1);
                        debug!(
                            batch_size = self.buffer.len(),
                            wait_ms = wait.as_millis() as u64,
                            "Flushing batch: wait interval elapsed"
                        );
                        self.flush();
                    }
                    deadline = Instant::now() + wait;
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if !self.buffer.is_empty() {
            info!(
                remaining = self.buffer.len(),
                "Pusher shutting down, flushing remaining records"
            );
            self.flush();
        }
        debug!("Loki pusher stopped");
    }

    fn flush(&mut self) {
        let records = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(preallocation(&self.settings)),
        );
        let batch_size = records.len();
        Counters::bump(&self.counters.records_flushed, batch_size as u64);

        match (self.flusher)(Batch::new(records)) {
            Ok(()) => {
                Counters::bump(&self.counters.batches_sent, 1);
                debug!(batch_size, "Log batch pushed");
            }
            Err(e) => {
                Counters::bump(&self.counters.batches_failed, 1);
                warn!(error = %e, batch_size, "Dropping log batch");
            }
        }
    }
}
