//! Detector wire protocol: outbound commands and inbound frame decoding.
//!
//! Both halves are pure; all I/O lives in [`crate::transport`] and
//! [`crate::acquisition`].

pub mod command;
pub mod frame;

pub use command::{encode_clear, encode_high_voltage_enable, encode_set_gating, GatingPeriod};
pub use frame::{decode_frame, RawFrame, Reading, FRAME_LEN};
