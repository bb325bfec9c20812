//! Timestamped readings.

use crate::protocol::Reading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded reading paired with the instant its frame finished arriving.
///
/// Samples are immutable and `Copy`; the sink and the observer each get
/// their own copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Decoded detector count.
    pub value: Reading,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Create a sample.
    pub fn new(value: Reading, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Capture time as fractional seconds since the Unix epoch.
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1e6
    }
}

/// Render a float the way the legacy log did: integral values keep a
/// trailing `.0`, everything else uses the shortest round-trip form.
pub fn format_legacy_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unix_timestamp_keeps_microseconds() {
        let ts = Utc.timestamp_opt(1_697_450_000, 123_456_000).unwrap();
        let sample = Sample::new(1.0, ts);
        assert!((sample.unix_timestamp() - 1_697_450_000.123456).abs() < 1e-6);
    }

    #[test]
    fn legacy_float_formatting() {
        assert_eq!(format_legacy_float(205500.0), "205500.0");
        assert_eq!(format_legacy_float(0.0), "0.0");
        assert_eq!(format_legacy_float(1697450000.25), "1697450000.25");
        assert_eq!(format_legacy_float(12.5), "12.5");
    }
}
