//! Scripted serial channel for testing without a detector.
//!
//! Reads are served from a script of [`MockRead`] entries, one entry per
//! `read_exact_or_available` call. Once the script is exhausted every read
//! returns nothing, as a detector that stopped talking would. Writes are
//! recorded and can be inspected through a [`MockProbe`] after the channel has
//! been moved onto the acquisition worker.
//!
//! # Example
//!
//! ```
//! use fluoro_acq::transport::{MockRead, MockSerialChannel, SerialChannel};
//! use std::time::Duration;
//!
//! let mut channel = MockSerialChannel::new()
//!     .with_reads([MockRead::ack(), MockRead::frame([1, 2, 5, 5])]);
//! let probe = channel.probe();
//!
//! channel.write(b"C\r").unwrap();
//! assert_eq!(channel.read_exact_or_available(2, Duration::from_secs(1)).unwrap().len(), 2);
//! assert_eq!(probe.writes(), vec![b"C\r".to_vec()]);
//! ```

use super::SerialChannel;
use crate::error::TransportError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One scripted outcome of a read call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Return these bytes (truncated to the requested length).
    Bytes(Vec<u8>),
    /// Nothing arrived before the timeout.
    Empty,
    /// The device vanished.
    Disconnect,
    /// I/O failure of the given kind.
    Error(std::io::ErrorKind),
}

impl MockRead {
    /// A 4-byte frame.
    pub fn frame(bytes: [u8; 4]) -> Self {
        MockRead::Bytes(bytes.to_vec())
    }

    /// A 2-byte command acknowledgment.
    pub fn ack() -> Self {
        MockRead::Bytes(b"OK".to_vec())
    }
}

#[derive(Debug, Default)]
struct Shared {
    writes: Mutex<Vec<Vec<u8>>>,
    reads: AtomicUsize,
    flushes: AtomicUsize,
    open: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read-only view of a [`MockSerialChannel`] that stays valid after the
/// channel has been handed to a session.
#[derive(Debug, Clone)]
pub struct MockProbe {
    shared: Arc<Shared>,
}

impl MockProbe {
    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.writes).clone()
    }

    /// Number of read calls served so far.
    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// Number of `flush_output` calls.
    pub fn flushes(&self) -> usize {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    /// Whether the channel is still open.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

/// Scripted [`SerialChannel`].
#[derive(Debug)]
pub struct MockSerialChannel {
    script: VecDeque<MockRead>,
    shared: Arc<Shared>,
    read_latency: Duration,
    empty_read_delay: Duration,
    fail_write_at: Option<usize>,
}

impl MockSerialChannel {
    /// An open channel with an empty script.
    pub fn new() -> Self {
        let shared = Shared::default();
        shared.open.store(true, Ordering::SeqCst);
        Self {
            script: VecDeque::new(),
            shared: Arc::new(shared),
            read_latency: Duration::from_millis(1),
            empty_read_delay: Duration::from_millis(5),
            fail_write_at: None,
        }
    }

    /// A channel that reports itself as closed.
    pub fn closed() -> Self {
        let channel = Self::new();
        channel.shared.open.store(false, Ordering::SeqCst);
        channel
    }

    /// Append entries to the read script.
    pub fn with_reads(mut self, reads: impl IntoIterator<Item = MockRead>) -> Self {
        self.script.extend(reads);
        self
    }

    /// Delay before every scripted read that returns data.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// How long an empty read blocks (capped by the caller's timeout).
    pub fn with_empty_read_delay(mut self, delay: Duration) -> Self {
        self.empty_read_delay = delay;
        self
    }

    /// Fail the write with this zero-based index.
    pub fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Handle for inspecting the channel after it has been moved.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl Default for MockSerialChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialChannel for MockSerialChannel {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut writes = lock(&self.shared.writes);
        if self.fail_write_at == Some(writes.len()) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_exact_or_available(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        self.shared.reads.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front().unwrap_or(MockRead::Empty) {
            MockRead::Bytes(mut bytes) => {
                std::thread::sleep(self.read_latency.min(timeout));
                bytes.truncate(n);
                Ok(bytes)
            }
            MockRead::Empty => {
                std::thread::sleep(self.empty_read_delay.min(timeout));
                Ok(Vec::new())
            }
            MockRead::Disconnect => {
                self.shared.open.store(false, Ordering::SeqCst);
                Err(TransportError::Disconnected)
            }
            MockRead::Error(kind) => Err(TransportError::Io(std::io::Error::new(
                kind,
                "mock read failure",
            ))),
        }
    }

    fn flush_output(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn serves_script_then_empty_tail() {
        let mut channel = MockSerialChannel::new()
            .with_reads([MockRead::frame([1, 2, 5, 5]), MockRead::Empty]);

        assert_eq!(
            channel.read_exact_or_available(4, TIMEOUT).unwrap(),
            vec![1, 2, 5, 5]
        );
        assert!(channel.read_exact_or_available(4, TIMEOUT).unwrap().is_empty());
        for _ in 0..3 {
            assert!(channel.read_exact_or_available(4, TIMEOUT).unwrap().is_empty());
        }
        assert_eq!(channel.probe().reads(), 5);
    }

    #[test]
    fn truncates_to_requested_length() {
        let mut channel = MockSerialChannel::new().with_reads([MockRead::frame([9, 9, 9, 9])]);
        assert_eq!(channel.read_exact_or_available(2, TIMEOUT).unwrap().len(), 2);
    }

    #[test]
    fn injected_write_failure() {
        let mut channel = MockSerialChannel::new().fail_write_at(1);
        channel.write(b"D\r").unwrap();
        assert!(channel.write(b"P\x19\r").is_err());
        assert_eq!(channel.probe().writes(), vec![b"D\r".to_vec()]);
    }

    #[test]
    fn disconnect_closes_channel() {
        let mut channel = MockSerialChannel::new().with_reads([MockRead::Disconnect]);
        let probe = channel.probe();
        assert!(matches!(
            channel.read_exact_or_available(4, TIMEOUT),
            Err(TransportError::Disconnected)
        ));
        assert!(!probe.is_open());
        assert!(matches!(channel.write(b"C\r"), Err(TransportError::NotOpen)));
    }

    #[test]
    fn closed_channel_rejects_io() {
        let mut channel = MockSerialChannel::closed();
        assert!(!channel.is_open());
        assert!(matches!(channel.flush_output(), Err(TransportError::NotOpen)));
    }
}
