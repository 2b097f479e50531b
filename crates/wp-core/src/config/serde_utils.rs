//! Duration fields in the config file
//!
//! Timeouts are written as whole seconds and poll intervals as
//! milliseconds, e.g. `leg_timeout = 30` and `result_poll_interval = 100`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

fn serialize_u64<S: Serializer>(value: u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value).unwrap_or(u64::MAX))
}

/// `#[serde(with = "duration_secs")]`
pub mod duration_secs {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_u64(duration.as_secs().into(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `#[serde(with = "duration_millis")]`
pub mod duration_millis {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_u64(duration.as_millis(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timing {
        #[serde(with = "duration_secs")]
        leg_timeout: Duration,
        #[serde(with = "duration_millis")]
        poll: Duration,
    }

    #[test]
    fn test_toml_uses_plain_integers() {
        let timing = Timing {
            leg_timeout: Duration::from_secs(30),
            poll: Duration::from_millis(150),
        };
        let text = toml::to_string(&timing).unwrap();
        assert!(text.contains("leg_timeout = 30"));
        assert!(text.contains("poll = 150"));
        assert_eq!(toml::from_str::<Timing>(&text).unwrap(), timing);
    }

    #[test]
    fn test_sub_second_timeout_truncates() {
        let timing = Timing {
            leg_timeout: Duration::from_millis(1500),
            poll: Duration::ZERO,
        };
        let back: Timing = toml::from_str(&toml::to_string(&timing).unwrap()).unwrap();
        assert_eq!(back.leg_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_negative_value_rejected() {
        assert!(toml::from_str::<Timing>("leg_timeout = -1\npoll = 0").is_err());
    }
}
