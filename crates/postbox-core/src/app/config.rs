//! ProcessingConfig - processor の設定
//!
//! 構築時に一度だけ読み込み、processor の生存期間中は変更しない。

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_POLLING_TIME: Duration = Duration::from_secs(5);

pub const BATCH_SIZE_ENV: &str = "POSTBOX_BATCH_SIZE";
pub const MAX_POLLING_TIME_ENV: &str = "POSTBOX_MAX_POLLING_TIME_MS";

/// Poll loop settings.
///
/// On the wire the polling budget is `max_polling_time_ms`; missing fields
/// fall back to the defaults (10 requests, 5 seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum number of requests fetched per cycle.
    pub batch_size: usize,

    /// Time budget of one cycle; the loop sleeps for whatever is left of it.
    #[serde(rename = "max_polling_time_ms", with = "duration_ms")]
    pub max_polling_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("max_polling_time must be positive")]
    ZeroPollingTime,

    #[error("{var}={value:?} is not a valid number")]
    InvalidNumber { var: &'static str, value: String },
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_polling_time: DEFAULT_MAX_POLLING_TIME,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_polling_time.is_zero() {
            return Err(ConfigError::ZeroPollingTime);
        }
        Ok(())
    }

    /// Defaults overridden by `POSTBOX_BATCH_SIZE` / `POSTBOX_MAX_POLLING_TIME_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(BATCH_SIZE_ENV) {
            config.batch_size = parse_number(BATCH_SIZE_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_POLLING_TIME_ENV) {
            config.max_polling_time = Duration::from_millis(parse_number(MAX_POLLING_TIME_ENV, &value)?);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parses straight into the target type, so out-of-range values are errors, not truncations.
fn parse_number<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ProcessingConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_polling_time, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_uses_millis_and_fills_defaults() {
        let config: ProcessingConfig =
            serde_json::from_str(r#"{"max_polling_time_ms": 250}"#).unwrap();

        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_polling_time, Duration::from_millis(250));

        let v = serde_json::to_value(&config).unwrap();
        assert_eq!(v, serde_json::json!({"batch_size": 10, "max_polling_time_ms": 250}));
    }

    #[test]
    fn zero_values_are_rejected() {
        let zero_batch = ProcessingConfig {
            batch_size: 0,
            ..ProcessingConfig::default()
        };
        let zero_time = ProcessingConfig {
            max_polling_time: Duration::ZERO,
            ..ProcessingConfig::default()
        };

        assert_eq!(zero_batch.validate(), Err(ConfigError::ZeroBatchSize));
        assert_eq!(zero_time.validate(), Err(ConfigError::ZeroPollingTime));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = ProcessingConfig::from_lookup(env(&[
            (BATCH_SIZE_ENV, "25"),
            (MAX_POLLING_TIME_ENV, " 1500 "),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_polling_time, Duration::from_millis(1_500));
        assert_eq!(
            ProcessingConfig::from_lookup(env(&[])).unwrap(),
            ProcessingConfig::default()
        );
    }

    #[test]
    fn lookup_reports_bad_values() {
        let err = ProcessingConfig::from_lookup(env(&[(BATCH_SIZE_ENV, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: BATCH_SIZE_ENV,
                value: "many".to_string()
            }
        );

        let err = ProcessingConfig::from_lookup(env(&[(BATCH_SIZE_ENV, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }

    #[rstest]
    #[case(BATCH_SIZE_ENV, "18446744073709551616")]
    #[case(BATCH_SIZE_ENV, "-3")]
    #[case(MAX_POLLING_TIME_ENV, "18446744073709551616")]
    fn out_of_range_numbers_are_rejected(#[case] var: &'static str, #[case] value: &str) {
        let err = ProcessingConfig::from_lookup(env(&[(var, value)])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var,
                value: value.to_string()
            }
        );
    }

    #[test]
    fn batch_size_beyond_u32_is_kept_whole_where_it_fits() {
        let value = u64::from(u32::MAX) + 1;
        let result = ProcessingConfig::from_lookup(env(&[(BATCH_SIZE_ENV, &value.to_string())]));

        match usize::try_from(value) {
            Ok(expected) => assert_eq!(result.unwrap().batch_size, expected),
            Err(_) => assert!(matches!(result, Err(ConfigError::InvalidNumber { .. }))),
        }
    }
}
