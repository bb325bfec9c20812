//! Byte transports between host and detector.
//!
//! The acquisition loop only ever talks to a [`SerialChannel`]. Two
//! implementations ship with the crate:
//!
//! - [`serial::SerialPortChannel`]: a real RS-232/USB-serial port (feature
//!   `instrument_serial`, on by default).
//! - [`mock::MockSerialChannel`]: a scripted channel for tests and dry runs.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::{MockProbe, MockRead, MockSerialChannel};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialPortChannel;

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blocking, byte-oriented duplex link to the detector.
///
/// # Contract
/// - `read_exact_or_available` blocks for at most `timeout` and returns up to `n`
///   bytes. An empty vector means nothing arrived in time; it is not an error.
/// - Any `Err` is a real link failure (disconnect, driver error).
/// - The channel is exclusively owned by one acquisition session at a time,
///   hence `&mut self` everywhere and `Send` for the move onto the worker thread.
pub trait SerialChannel: Send {
    /// Whether the underlying port is open.
    fn is_open(&self) -> bool;

    /// Write all bytes.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `n` bytes, waiting at most `timeout`.
    fn read_exact_or_available(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Discard anything still queued for transmission.
    fn flush_output(&mut self) -> Result<(), TransportError>;

    /// Close the port. Further operations fail with [`TransportError::NotOpen`].
    fn close(&mut self);
}

impl<T: SerialChannel + ?Sized> SerialChannel for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn read_exact_or_available(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_exact_or_available(n, timeout)
    }

    fn flush_output(&mut self) -> Result<(), TransportError> {
        (**self).flush_output()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("stop_bits must be 1 or 2, got {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Line settings for opening a serial port.
///
/// Defaults match the detector: 9600 baud, 8N1, one second read timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port path (e.g. "/dev/ttyUSB0", "COM3").
    pub port: String,
    /// Line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Stop bits (1 or 2).
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Parity.
    #[serde(default)]
    pub parity: Parity,
    /// Read timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

impl SerialSettings {
    /// Detector defaults for the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Read timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
