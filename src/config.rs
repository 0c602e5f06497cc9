//! Settings read from the environment (a `.env` file is honoured by `main`).
//!
//! Required: `DATABASE_URL`, `KAFKA_BROKERS`. Everything else has a default.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    pub brokers: String,
    pub client_id: String,
}

/// Relay tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSettings {
    /// Records selected per tick.
    pub batch_size: i64,
    /// Delay between the end of one tick and the start of the next.
    pub tick_interval: Duration,
    /// Upper bound on waiting for a broker acknowledgement.
    pub publish_timeout: Duration,
    /// Failed attempts after which a record is parked.
    pub max_retries: i32,
    pub backfill_on_start: bool,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            tick_interval: Duration::from_millis(5_000),
            publish_timeout: Duration::from_millis(10_000),
            max_retries: 5,
            backfill_on_start: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub database_pool_size: u32,
    pub host: String,
    pub port: u16,
    pub kafka: KafkaSettings,
    pub outbox: OutboxSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = OutboxSettings::default();

        let batch_size: i64 = vars.parse_or("OUTBOX_BATCH_SIZE", defaults.batch_size)?;
        if batch_size <= 0 {
            return Err(vars.invalid("OUTBOX_BATCH_SIZE", "must be at least 1"));
        }
        let max_retries: i32 = vars.parse_or("OUTBOX_MAX_RETRIES", defaults.max_retries)?;
        if max_retries <= 0 {
            return Err(vars.invalid("OUTBOX_MAX_RETRIES", "must be at least 1"));
        }
        let publish_timeout_ms: u64 = vars.parse_or(
            "OUTBOX_PUBLISH_TIMEOUT_MS",
            defaults.publish_timeout.as_millis() as u64,
        )?;
        if publish_timeout_ms == 0 {
            return Err(vars.invalid("OUTBOX_PUBLISH_TIMEOUT_MS", "must be at least 1"));
        }
        let tick_interval_ms: u64 = vars.parse_or(
            "OUTBOX_TICK_INTERVAL_MS",
            defaults.tick_interval.as_millis() as u64,
        )?;
        if tick_interval_ms == 0 {
            return Err(vars.invalid("OUTBOX_TICK_INTERVAL_MS", "must be at least 1"));
        }
        let database_pool_size: u32 = vars.parse_or("DATABASE_POOL_SIZE", 10)?;
        if database_pool_size == 0 {
            return Err(vars.invalid("DATABASE_POOL_SIZE", "must be at least 1"));
        }

        Ok(Self {
            database_url: vars.required("DATABASE_URL")?,
            database_pool_size,
            host: vars.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: vars.parse_or("PORT", 8080)?,
            kafka: KafkaSettings {
                brokers: vars.required("KAFKA_BROKERS")?,
                client_id: vars
                    .get("KAFKA_CLIENT_ID")
                    .unwrap_or_else(|| "master-data-outbox".to_string()),
            },
            outbox: OutboxSettings {
                batch_size,
                tick_interval: Duration::from_millis(tick_interval_ms),
                publish_timeout: Duration::from_millis(publish_timeout_ms),
                max_retries,
                backfill_on_start: vars
                    .parse_or("OUTBOX_BACKFILL_ON_START", defaults.backfill_on_start)?,
            },
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn parse_or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn invalid(&self, var: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            var,
            value: self.get(var).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}
