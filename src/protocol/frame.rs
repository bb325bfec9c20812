//! Frame decoding.
//!
//! Each acquisition cycle the detector sends a 4-byte frame. The count is not a
//! binary integer: each byte is a group of decimal digits with variable width,
//! and the reading is recovered by rendering the bytes as text:
//!
//! 1. byte 0 and byte 1 are rendered as plain decimal (`5` -> `"5"`);
//! 2. byte 2 is left-padded with zeros to two digits (`5` -> `"05"`);
//! 3. byte 3 is right-padded with zeros to three digits (`5` -> `"500"`,
//!    `12` -> `"120"`). This is text padding, not scaling;
//! 4. the four groups are concatenated, the first character is dropped and the
//!    next six are parsed as the reading.
//!
//! ```
//! use fluoro_acq::protocol::frame::decode_frame;
//!
//! // "1" + "2" + "05" + "500" = "1205500" -> "205500"
//! assert_eq!(decode_frame(&[1, 2, 5, 5]).unwrap(), 205500.0);
//! ```
//!
//! The scheme is kept byte-for-byte compatible with the detector's legacy host
//! software; changing it would silently change the recorded measurements.

use crate::error::DecodeError;

/// Number of bytes the detector sends per acquisition cycle.
pub const FRAME_LEN: usize = 4;

/// Digits required in the assembled string (one skipped plus six kept).
const MIN_DIGITS: usize = 7;

/// Range of the assembled digit string that holds the reading.
const READING_DIGITS: std::ops::Range<usize> = 1..7;

/// Decoded detector count.
pub type Reading = f64;

/// A complete 4-byte frame as read from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFrame(pub [u8; FRAME_LEN]);

impl RawFrame {
    /// Decode this frame into a reading.
    pub fn decode(&self) -> Result<Reading, DecodeError> {
        decode_frame(&self.0)
    }
}

impl TryFrom<&[u8]> for RawFrame {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| DecodeError::FrameTooShort {
            digits: assemble_digits(bytes).len(),
        })?;
        Ok(RawFrame(array))
    }
}

/// Render the payload bytes into the detector's digit string.
///
/// Accepts partial payloads (a read that timed out mid-frame); positions that
/// were not received simply contribute nothing.
pub fn assemble_digits(payload: &[u8]) -> String {
    let mut digits = String::with_capacity(9);
    for (index, byte) in payload.iter().enumerate() {
        let group = match index {
            2 => format!("{byte:02}"),
            3 => format!("{byte:0<3}"),
            _ => byte.to_string(),
        };
        digits.push_str(&group);
    }
    digits
}

/// Decode a frame payload into a reading.
///
/// # Errors
/// - [`DecodeError::FrameTooShort`] when fewer than 7 digits can be assembled
///   (only possible for partial payloads).
/// - [`DecodeError::NonNumericPayload`] when the selected digits do not parse.
pub fn decode_frame(payload: &[u8]) -> Result<Reading, DecodeError> {
    let digits = assemble_digits(payload);
    if digits.len() < MIN_DIGITS {
        return Err(DecodeError::FrameTooShort {
            digits: digits.len(),
        });
    }

    // `digits` is pure ASCII, so byte indexing matches character indexing.
    let selected = &digits[READING_DIGITS];
    selected
        .parse::<Reading>()
        .map_err(|_| DecodeError::NonNumericPayload(selected.to_string()))
}
