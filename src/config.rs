//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::backoff::Jitter;
use derive_builder::*;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::env;
use std::num::ParseIntError;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(7000);

const ENV_PREFIX: &str = "RETRY_";
const MAX_ATTEMPTS_ENV: &str = "RETRY_MAX_ATTEMPTS";
const BASE_DELAY_ENV: &str = "RETRY_BASE_DELAY_MS";
const MAX_DELAY_ENV: &str = "RETRY_MAX_DELAY_MS";
const JITTER_ENV: &str = "RETRY_JITTER";
const ATTEMPT_TIMEOUT_ENV: &str = "RETRY_ATTEMPT_TIMEOUT_MS";
const JITTER_SEED_ENV: &str = "RETRY_JITTER_SEED";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not parse {} as an integer: {}", key, source))]
    ParseInt { key: String, source: ParseIntError },

    #[snafu(display("Unknown jitter strategy {:?}, expected none, full or equal", value))]
    UnknownJitter { value: String },

    #[snafu(display("Invalid retry configuration: {}", msg))]
    Invalid { msg: String },
}

/// The plain knobs of a retry policy.
///
/// Durations are serialized as whole milliseconds.
#[derive(Builder, Debug, CopyGetters, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[builder(derive(Debug), setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct RetryConfig {
    /// Hard ceiling on the number of times the work is invoked.
    #[get_copy = "pub"]
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    pub(crate) max_attempts: u32,

    #[get_copy = "pub"]
    #[builder(default = "DEFAULT_BASE_DELAY")]
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub(crate) base_delay: Duration,

    #[get_copy = "pub"]
    #[builder(default = "DEFAULT_MAX_DELAY")]
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub(crate) max_delay: Duration,

    #[get_copy = "pub"]
    #[builder(default = "Jitter::None")]
    pub(crate) jitter: Jitter,

    /// Deadline of a single attempt. `None` leaves attempts unbounded.
    #[get_copy = "pub"]
    #[builder(default = "None")]
    #[serde(rename = "attempt_timeout_ms", with = "optional_millis")]
    pub(crate) attempt_timeout: Option<Duration>,

    /// Seed of the jitter random source. `None` seeds from the OS.
    #[get_copy = "pub"]
    #[builder(default = "None")]
    pub(crate) jitter_seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: Jitter::None,
            attempt_timeout: None,
            jitter_seed: None,
        }
    }
}

impl RetryConfig {
    /// Builds a config from the `RETRY_*` environment variables.
    pub fn from_env() -> Result<RetryConfig, ConfigError> {
        RetryConfigBuilder::from_env()?
            .build()
            .map_err(|msg| ConfigError::Invalid { msg })
    }
}

impl RetryConfigBuilder {
    /// A builder pre-populated from the `RETRY_*` environment variables.
    /// Variables that are not set keep the builder defaults.
    pub fn from_env() -> Result<RetryConfigBuilder, ConfigError> {
        RetryConfigBuilder::from_vars(env::vars().filter(|(k, _v)| k.starts_with(ENV_PREFIX)))
    }

    pub fn from_vars<I>(vars: I) -> Result<RetryConfigBuilder, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut builder = RetryConfigBuilder::default();
        for (key, value) in vars {
            match key.as_str() {
                MAX_ATTEMPTS_ENV => {
                    builder.max_attempts(value.trim().parse::<u32>().context(ParseInt { key: key.as_str() })?);
                }
                BASE_DELAY_ENV => {
                    builder.base_delay(parse_millis(&key, &value)?);
                }
                MAX_DELAY_ENV => {
                    builder.max_delay(parse_millis(&key, &value)?);
                }
                JITTER_ENV => {
                    builder.jitter(value.parse::<Jitter>()?);
                }
                ATTEMPT_TIMEOUT_ENV => {
                    builder.attempt_timeout(Some(parse_millis(&key, &value)?));
                }
                JITTER_SEED_ENV => {
                    builder.jitter_seed(Some(value.trim().parse::<u64>().context(ParseInt { key: key.as_str() })?));
                }
                _ => {
                    debug!("ignoring unrecognized retry variable {}", key);
                }
            }
        }
        Ok(builder)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_attempts {
            return Err("max_attempts must be at least 1".to_owned());
        }
        if let Some(Some(timeout)) = self.attempt_timeout {
            if timeout == Duration::from_millis(0) {
                return Err("attempt_timeout must be positive when set".to_owned());
            }
        }
        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let millis = value.trim().parse::<u64>().context(ParseInt { key })?;
    Ok(Duration::from_millis(millis))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::convert::TryFrom;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::convert::TryFrom;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}
