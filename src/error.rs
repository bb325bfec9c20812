//! Error types for the acquisition stack.
//!
//! Errors are split by the layer that produces them so the acquisition loop
//! can decide, per variant, whether a failure is local to one cycle or fatal
//! to the whole session:
//!
//! - **`DecodeError`**: a single frame could not be turned into a reading. The loop
//!   skips the cycle and keeps running.
//! - **`TransportError`**: the serial link failed. Fatal once the session is running.
//! - **`SinkError`**: the durable sample log rejected a write. Fatal, a measurement
//!   that cannot be persisted must not be silently dropped.
//! - **`ConfigError`**: invalid configuration, rejected before any I/O happens.
//! - **`AcquisitionError`**: what the control surface (`start`, `stop`) returns.
//!
//! All of them use `thiserror`, and `#[from]` conversions keep `?` usable across
//! layer boundaries.

use thiserror::Error;

/// Convenience alias for results returned by the acquisition control surface.
pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

/// A frame could not be decoded into a reading. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The assembled digit string has fewer than the 7 characters needed.
    #[error("frame too short: assembled {digits} digit(s), need at least 7")]
    FrameTooShort {
        /// Number of digit characters that were assembled.
        digits: usize,
    },

    /// The extracted digits could not be parsed as a float.
    #[error("non-numeric payload '{0}'")]
    NonNumericPayload(String),
}

/// Failure of the byte transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// An operation was attempted on a channel that is closed.
    #[error("serial channel is not open")]
    NotOpen,

    /// The device went away (unplugged, port closed underneath us).
    #[error("device disconnected")]
    Disconnected,

    /// Driver-level failure reported by the serial port backend.
    #[error("serial port error: {0}")]
    Serial(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => TransportError::Disconnected,
            serialport::ErrorKind::Io(kind) => {
                TransportError::Io(std::io::Error::new(kind, err.description))
            }
            _ => TransportError::Serial(err.description),
        }
    }
}

/// Failure of the durable sample sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing or flushing the underlying file failed.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV encoder rejected a record.
    #[error("CSV error: {0}")]
    Csv(String),

    /// Append was called after the sink was finalized.
    #[error("sink is closed")]
    Closed,
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for SinkError {
    fn from(err: csv::Error) -> Self {
        SinkError::Csv(err.to_string())
    }
}

/// Invalid configuration, rejected synchronously before a session starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The gating period is not one of the values the detector accepts.
    #[error("invalid gating period '{0}': expected one of 100ms, 200ms, 250ms, 500ms, 1000ms")]
    InvalidGatingPeriod(String),

    /// A value parsed but is semantically invalid.
    #[error("configuration validation error: {0}")]
    Invalid(String),

    /// The configuration sources could not be loaded or deserialized.
    #[error("configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Handshake step that failed, reported inside [`AcquisitionError::HandshakeFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Discarding pending output before the first command.
    FlushOutput,
    /// Writing `D\r`.
    HighVoltageEnable,
    /// Reading the 2-byte acknowledgment after `D\r`.
    HighVoltageAck,
    /// Writing `P<code>\r`.
    SetGating,
    /// Reading the 2-byte acknowledgment after `P<code>\r`.
    SetGatingAck,
    /// Writing `C\r`.
    Clear,
    /// Reading and discarding the first frame after `C\r`.
    DiscardAfterClear,
}

impl std::fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeStep::FlushOutput => "flush output",
            HandshakeStep::HighVoltageEnable => "high-voltage enable",
            HandshakeStep::HighVoltageAck => "high-voltage acknowledgment",
            HandshakeStep::SetGating => "set gating period",
            HandshakeStep::SetGatingAck => "gating period acknowledgment",
            HandshakeStep::Clear => "clear",
            HandshakeStep::DiscardAfterClear => "discard after clear",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the acquisition control surface and the worker.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Rejected configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called with a transport that is not open.
    #[error("serial channel not connected")]
    NotConnected,

    /// A write or read failed while configuring the detector.
    #[error("handshake failed during {step}: {source}")]
    HandshakeFailed {
        /// Which step of the handshake failed.
        step: HandshakeStep,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The transport failed while the loop was running.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The sample sink failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// The worker thread could not be spawned.
    #[error("failed to spawn acquisition worker: {0}")]
    WorkerSpawn(std::io::Error),

    /// The worker thread panicked; the transport is lost.
    #[error("acquisition worker panicked")]
    WorkerPanicked,
}
