//! # Fluorescence acquisition library
//!
//! Acquires readings from a photon-counting fluorescence detector over a
//! serial link, decodes them, and streams timestamped samples to a durable
//! log and a live observer.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Pure encoding of detector commands and decoding of the
//!   4-byte frames into readings.
//! - **`transport`**: The `SerialChannel` abstraction, a `serialport`-backed
//!   implementation and a scripted mock.
//! - **`data`**: `Sample`, durable sinks (legacy text log, CSV) and live
//!   observers (bounded channel, tracing).
//! - **`acquisition`**: The session state machine and worker loop, plus the
//!   `start` / `stop` / `state` control surface.
//! - **`config`**: Figment-based configuration from TOML and environment.
//! - **`tracing_init`**: Subscriber setup for applications.
//! - **`error`**: Error types for every layer.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod tracing_init;
pub mod transport;

pub use acquisition::{start, AcquisitionConfig, LoopState, SessionHandle, SessionReport};
pub use data::Sample;
pub use error::{AcquisitionError, AcquisitionResult};
pub use protocol::GatingPeriod;
