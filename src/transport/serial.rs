//! Serial port transport backed by the `serialport` crate.
//!
//! Protocol parameters expected by the detector:
//! - Baud: 9600, 8 data bits, no parity, 1 stop bit
//! - No flow control
//! - 1 second read timeout
//!
//! # Example
//!
//! ```no_run
//! use fluoro_acq::transport::{SerialChannel, SerialPortChannel, SerialSettings};
//!
//! let mut port = SerialPortChannel::open(&SerialSettings::new("/dev/ttyUSB0"))?;
//! port.write(b"C\r")?;
//! let frame = port.read_exact_or_available(4, std::time::Duration::from_secs(1))?;
//! # Ok::<(), fluoro_acq::error::TransportError>(())
//! ```

use super::{Parity, SerialChannel, SerialSettings, StopBits};
use crate::error::TransportError;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A detector connected over a real serial port.
pub struct SerialPortChannel {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortChannel {
    /// Open the port described by `settings`.
    ///
    /// # Errors
    /// Returns an error if the port does not exist or cannot be configured.
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.timeout())
            .open()?;

        debug!(
            port = %settings.port,
            baud = settings.baud_rate,
            "Opened detector serial port"
        );

        Ok(Self {
            name: settings.port.clone(),
            port: Some(port),
        })
    }

    /// Port path this channel was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl SerialChannel for SerialPortChannel {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!(port = %self.name, bytes = ?bytes, "write");
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_exact_or_available(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut buffer = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)?;

            match port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(err) if err.kind() == ErrorKind::TimedOut => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(TransportError::Disconnected)
                }
                Err(err) => return Err(err.into()),
            }
        }

        buffer.truncate(filled);
        trace!(port = %self.name, bytes = ?buffer, "read");
        Ok(buffer)
    }

    fn flush_output(&mut self) -> Result<(), TransportError> {
        self.port_mut()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.name, "Closed detector serial port");
        }
    }
}
