//! Outbound detector commands.
//!
//! The detector speaks a tiny ASCII command set, every command terminated by CR:
//!
//! | Command        | Bytes            | Reply            |
//! |----------------|------------------|------------------|
//! | High voltage   | `D\r`            | 2-byte ack       |
//! | Gating period  | `P<code>\r`      | 2-byte ack       |
//! | Clear / start  | `C\r`            | frame stream     |
//!
//! `<code>` is a single raw byte whose numeric value is the gating code from
//! [`GatingPeriod::code`].

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const TERMINATOR: u8 = b'\r';

/// Gating (counting) period of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatingPeriod {
    /// 100 ms
    Ms100,
    /// 200 ms
    Ms200,
    /// 250 ms
    Ms250,
    /// 500 ms
    Ms500,
    /// 1000 ms
    Ms1000,
}

impl GatingPeriod {
    /// Every accepted period, shortest first.
    pub const ALL: [GatingPeriod; 5] = [
        GatingPeriod::Ms100,
        GatingPeriod::Ms200,
        GatingPeriod::Ms250,
        GatingPeriod::Ms500,
        GatingPeriod::Ms1000,
    ];

    /// Code byte sent to the detector (period in units of 10 ms).
    pub const fn code(self) -> u8 {
        match self {
            GatingPeriod::Ms100 => 10,
            GatingPeriod::Ms200 => 20,
            GatingPeriod::Ms250 => 25,
            GatingPeriod::Ms500 => 50,
            GatingPeriod::Ms1000 => 100,
        }
    }

    /// Period in milliseconds.
    pub const fn millis(self) -> u64 {
        match self {
            GatingPeriod::Ms100 => 100,
            GatingPeriod::Ms200 => 200,
            GatingPeriod::Ms250 => 250,
            GatingPeriod::Ms500 => 500,
            GatingPeriod::Ms1000 => 1000,
        }
    }

    /// Period as a [`Duration`].
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.millis())
    }

    /// Look a period up by its millisecond value.
    pub fn from_millis(ms: u64) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|p| p.millis() == ms)
            .ok_or_else(|| ConfigError::InvalidGatingPeriod(format!("{ms}ms")))
    }
}

impl fmt::Display for GatingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

impl FromStr for GatingPeriod {
    type Err = ConfigError;

    /// Accepts `"250ms"`, `"250 ms"` or a bare `"250"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix("ms")
            .map(str::trim_end)
            .unwrap_or(trimmed);
        let ms: u64 = digits
            .parse()
            .map_err(|_| ConfigError::InvalidGatingPeriod(s.to_string()))?;
        Self::from_millis(ms).map_err(|_| ConfigError::InvalidGatingPeriod(s.to_string()))
    }
}

impl TryFrom<u64> for GatingPeriod {
    type Error = ConfigError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::from_millis(ms)
    }
}

impl Serialize for GatingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GatingPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => GatingPeriod::from_millis(ms),
            Raw::Text(text) => text.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// `P<code>\r`: select the gating period.
pub fn encode_set_gating(period: GatingPeriod) -> Vec<u8> {
    vec![b'P', period.code(), TERMINATOR]
}

/// `D\r`: switch the photomultiplier high voltage on.
pub fn encode_high_voltage_enable() -> Vec<u8> {
    vec![b'D', TERMINATOR]
}

/// `C\r`: clear the counter and start streaming frames.
pub fn encode_clear() -> Vec<u8> {
    vec![b'C', TERMINATOR]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_gating_carries_code_as_raw_byte() {
        for period in GatingPeriod::ALL {
            let bytes = encode_set_gating(period);
            assert_eq!(bytes.len(), 3);
            assert_eq!(bytes[0], b'P');
            assert_eq!(bytes[1], period.code());
            assert_eq!(bytes[2], b'\r');
        }
        assert_eq!(encode_set_gating(GatingPeriod::Ms250), b"P\x19\r");
        assert_eq!(encode_set_gating(GatingPeriod::Ms1000), b"Pd\r");
    }

    #[test]
    fn code_table_is_exhaustive() {
        let codes: Vec<u8> = GatingPeriod::ALL.iter().map(|p| p.code()).collect();
        assert_eq!(codes, vec![10, 20, 25, 50, 100]);
        for period in GatingPeriod::ALL {
            assert_eq!(u64::from(period.code()) * 10, period.millis());
            assert!(period.code() < 128);
        }
    }

    #[test]
    fn constant_commands() {
        assert_eq!(encode_high_voltage_enable(), b"D\r");
        assert_eq!(encode_clear(), b"C\r");
    }

    #[test]
    fn parses_period_strings() {
        assert_eq!("250ms".parse::<GatingPeriod>().unwrap(), GatingPeriod::Ms250);
        assert_eq!("1000 ms".parse::<GatingPeriod>().unwrap(), GatingPeriod::Ms1000);
        assert_eq!("100".parse::<GatingPeriod>().unwrap(), GatingPeriod::Ms100);
        assert!(matches!(
            "300ms".parse::<GatingPeriod>(),
            Err(ConfigError::InvalidGatingPeriod(s)) if s == "300ms"
        ));
        assert!("fast".parse::<GatingPeriod>().is_err());
        assert!(GatingPeriod::try_from(750).is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for period in GatingPeriod::ALL {
            assert_eq!(period.to_string().parse::<GatingPeriod>().unwrap(), period);
        }
    }

    #[test]
    fn deserializes_from_text_or_integer() {
        #[derive(Deserialize)]
        struct Wrapper {
            period: GatingPeriod,
        }

        let text: Wrapper = toml::from_str(r#"period = "500ms""#).unwrap();
        assert_eq!(text.period, GatingPeriod::Ms500);

        let int: Wrapper = toml::from_str("period = 200").unwrap();
        assert_eq!(int.period, GatingPeriod::Ms200);

        assert!(toml::from_str::<Wrapper>("period = 42").is_err());
    }
}
