//! Live sample consumers.
//!
//! Observers are called on the acquisition worker, once per sample and in
//! arrival order. They must return quickly; anything slow (plotting, network)
//! belongs behind a [`ChannelObserver`], whose bounded queue blocks the worker
//! while full, up to a fixed limit per sample.

use crate::data::sample::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Default upper bound on how long one `notify` may wait for queue space.
pub const DEFAULT_MAX_BLOCK: Duration = Duration::from_secs(1);

/// Poll interval while the queue is full.
const FULL_QUEUE_POLL: Duration = Duration::from_millis(1);

/// Receives every sample as it is acquired.
pub trait SampleObserver: Send {
    /// Called once per sample, in arrival order.
    fn notify(&mut self, sample: Sample);
}

impl<T: SampleObserver + ?Sized> SampleObserver for Box<T> {
    fn notify(&mut self, sample: Sample) {
        (**self).notify(sample)
    }
}

/// Observer that ignores every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SampleObserver for NullObserver {
    fn notify(&mut self, _sample: Sample) {}
}

// =============================================================================
// ChannelObserver - bounded hand-off to async consumers
// =============================================================================

/// Create a bounded observer/stream pair.
///
/// The observer side lives on the acquisition worker; the stream side is
/// consumed from async code (a display task, a network publisher).
pub fn sample_channel(capacity: usize) -> (ChannelObserver, SampleStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let missed = Arc::new(AtomicU64::new(0));
    (
        ChannelObserver {
            tx,
            max_block: DEFAULT_MAX_BLOCK,
            missed: Arc::clone(&missed),
            receiver_gone: false,
        },
        SampleStream { rx, missed },
    )
}

/// Forwards samples into a bounded queue.
///
/// While the queue is full `notify` blocks the worker, which is the
/// backpressure path. A consumer that stalls without being dropped would
/// otherwise hold the worker (and `SessionHandle::stop`) forever, so each
/// sample waits at most `max_block`. A sample that still does not fit is
/// skipped for this observer only and counted in [`SampleStream::missed`];
/// the sink has already recorded it.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::Sender<Sample>,
    max_block: Duration,
    missed: Arc<AtomicU64>,
    receiver_gone: bool,
}

impl ChannelObserver {
    /// Change the per-sample wait limit (default [`DEFAULT_MAX_BLOCK`]).
    pub fn with_max_block(mut self, max_block: Duration) -> Self {
        self.max_block = max_block;
        self
    }
}

impl SampleObserver for ChannelObserver {
    fn notify(&mut self, sample: Sample) {
        if self.receiver_gone {
            return;
        }
        // Runs on the dedicated worker thread, never inside the async runtime.
        let deadline = Instant::now() + self.max_block;
        let mut pending = sample;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Closed(_)) => {
                    debug!("Sample stream receiver dropped; live display detached");
                    self.receiver_gone = true;
                    return;
                }
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        let missed = self.missed.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(missed, "Sample stream stalled; sample skipped for live display");
                        return;
                    }
                    pending = returned;
                    std::thread::sleep(FULL_QUEUE_POLL);
                }
            }
        }
    }
}

/// Receiving end of [`sample_channel`].
#[derive(Debug)]
pub struct SampleStream {
    rx: mpsc::Receiver<Sample>,
    missed: Arc<AtomicU64>,
}

impl SampleStream {
    /// Next sample, or `None` once the session has ended and the queue drained.
    ///
    /// ```
    /// use chrono::Utc;
    /// use fluoro_acq::data::{sample_channel, Sample, SampleObserver};
    ///
    /// let (mut observer, mut stream) = sample_channel(4);
    /// observer.notify(Sample::new(205500.0, Utc::now()));
    /// drop(observer);
    ///
    /// # tokio_test::block_on(async {
    /// assert_eq!(stream.recv().await.map(|s| s.value), Some(205500.0));
    /// assert!(stream.recv().await.is_none());
    /// # });
    /// ```
    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }

    /// Blocking variant for use outside the async runtime.
    pub fn blocking_recv(&mut self) -> Option<Sample> {
        self.rx.blocking_recv()
    }

    /// Take a sample if one is queued.
    pub fn try_recv(&mut self) -> Option<Sample> {
        self.rx.try_recv().ok()
    }

    /// Samples skipped because this stream was not drained in time.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// TracingObserver - log each sample
// =============================================================================

/// Logs each sample as a structured `info` event. Used by the CLI display.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver {
    count: u64,
}

impl SampleObserver for TracingObserver {
    fn notify(&mut self, sample: Sample) {
        self.count += 1;
        info!(
            n = self.count,
            value = sample.value,
            unix_timestamp = sample.unix_timestamp(),
            "Signal: {}",
            sample.value
        );
    }
}

// =============================================================================
// RecordingObserver - collect samples for inspection
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collects every sample into a shared vector.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl RecordingObserver {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples seen so far. Clones of the observer share the same record.
    pub fn samples(&self) -> Vec<Sample> {
        lock(&self.samples).clone()
    }
}

impl SampleObserver for RecordingObserver {
    fn notify(&mut self, sample: Sample) {
        lock(&self.samples).push(sample);
    }
}
