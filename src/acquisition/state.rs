//! Session state published by the acquisition worker.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a session ended in [`LoopState::Faulted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A write or read failed while configuring the detector.
    HandshakeFailed,
    /// The serial link failed while running.
    TransportError,
    /// The durable sink rejected a sample.
    SinkError,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaultKind::HandshakeFailed => "handshake failed",
            FaultKind::TransportError => "transport error",
            FaultKind::SinkError => "sink error",
        })
    }
}

/// Reason code plus the rendered underlying error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReason {
    /// Category of the failure.
    pub kind: FaultKind,
    /// Human readable detail.
    pub message: String,
}

impl FaultReason {
    pub(crate) fn new(kind: FaultKind, error: &dyn std::error::Error) -> Self {
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Lifecycle of one acquisition session.
///
/// ```text
/// Idle -> Handshaking -> Running -> Stopping -> Stopped
///             \              \          \
///              +--------------+----------+--> Faulted
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Created, worker not yet running.
    #[default]
    Idle,
    /// Sending configuration commands.
    Handshaking,
    /// Streaming frames.
    Running,
    /// Stop observed; finalizing the sink.
    Stopping,
    /// Finished cleanly.
    Stopped,
    /// Finished with a fatal error. Restart with a freshly opened transport.
    Faulted(FaultReason),
}

impl LoopState {
    /// `Stopped` or `Faulted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped | LoopState::Faulted(_))
    }

    /// Fault reason, if faulted.
    pub fn fault(&self) -> Option<&FaultReason> {
        match self {
            LoopState::Faulted(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Handshaking => f.write_str("handshaking"),
            LoopState::Running => f.write_str("running"),
            LoopState::Stopping => f.write_str("stopping"),
            LoopState::Stopped => f.write_str("stopped"),
            LoopState::Faulted(reason) => write!(f, "faulted ({reason})"),
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Non-empty reads passed to the decoder.
    pub frames_read: u64,
    /// Reads that returned nothing within the timeout.
    pub empty_reads: u64,
    /// Frames skipped because they did not decode.
    pub decode_errors: u64,
    /// Samples appended to the sink and sent to the observer.
    pub samples_emitted: u64,
}

/// Snapshot published on every state change and every cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub state: LoopState,
    /// Counters so far.
    pub stats: SessionStats,
}

/// Cooperative stop request shared between a session handle and its worker.
///
/// The worker checks it before every blocking read; a read in progress is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
}

impl StopFlag {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop at the next iteration boundary.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
