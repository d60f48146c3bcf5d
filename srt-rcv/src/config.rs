use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CAPACITY: usize = 8192; // packets
const DEFAULT_TSBPD_DELAY: u64 = 120; // ms
const DEFAULT_DRIFT_MAX_SAMPLES: u32 = 1000;
const DEFAULT_DRIFT_MAX_VALUE: i64 = 5000; // us
const DEFAULT_PAYLOAD_SIZE: usize = 1456; // bytes

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RcvConfig {
    /// Number of slots in the receive buffer
    capacity: usize,

    /// Whether the application reads whole messages (true) or a byte stream (false)
    message_api: bool,

    /// Whether the peer uses bit 26 of the message number field as the retransmitted flag
    peer_rexmit_flag: bool,

    /// Fixed buffering latency applied to every packet, timestamp based delivery
    /// is disabled when unset.
    tsbpd_delay_ms: Option<u64>,

    /// Number of drift samples averaged before the drift estimate is updated
    drift_max_samples: u32,

    /// Drift (in microseconds) beyond which the time base is corrected
    drift_max_value_us: i64,

    /// Payload storage preallocated for every unit
    payload_size: usize,

    /// Number of units in the pool, defaults to twice the capacity
    units: Option<usize>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("receive buffer capacity must be greater than 0")]
    ZeroCapacity,
    #[error("drift tracer must average at least one sample")]
    ZeroDriftSamples,
    #[error("drift threshold must be positive, got {0}us")]
    InvalidDriftThreshold(i64),
    #[error("unit pool of {0} units cannot back a buffer of {1} slots")]
    PoolTooSmall(usize, usize),
}

impl Default for RcvConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            message_api: true,
            peer_rexmit_flag: true,
            tsbpd_delay_ms: Some(DEFAULT_TSBPD_DELAY),
            drift_max_samples: DEFAULT_DRIFT_MAX_SAMPLES,
            drift_max_value_us: DEFAULT_DRIFT_MAX_VALUE,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            units: None,
        }
    }
}

impl RcvConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.drift_max_samples == 0 {
            return Err(ConfigError::ZeroDriftSamples);
        }

        if self.drift_max_value_us <= 0 {
            return Err(ConfigError::InvalidDriftThreshold(self.drift_max_value_us));
        }

        if self.units() < self.capacity {
            return Err(ConfigError::PoolTooSmall(self.units(), self.capacity));
        }

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn with_capacity(mut self, value: usize) -> Self {
        self.capacity = value;

        self
    }

    pub fn message_api(&self) -> bool {
        self.message_api
    }

    pub fn with_message_api(mut self, value: bool) -> Self {
        self.message_api = value;

        self
    }

    pub fn peer_rexmit_flag(&self) -> bool {
        self.peer_rexmit_flag
    }

    pub fn with_peer_rexmit_flag(mut self, value: bool) -> Self {
        self.peer_rexmit_flag = value;

        self
    }

    pub fn tsbpd_delay(&self) -> Option<Duration> {
        self.tsbpd_delay_ms.map(Duration::from_millis)
    }

    pub fn with_tsbpd_delay(mut self, value: Option<Duration>) -> Self {
        self.tsbpd_delay_ms = value.map(|delay| delay.as_millis() as u64);

        self
    }

    pub fn drift_max_samples(&self) -> u32 {
        self.drift_max_samples
    }

    pub fn with_drift_max_samples(mut self, value: u32) -> Self {
        self.drift_max_samples = value;

        self
    }

    pub fn drift_max_value_us(&self) -> i64 {
        self.drift_max_value_us
    }

    pub fn with_drift_max_value_us(mut self, value: i64) -> Self {
        self.drift_max_value_us = value;

        self
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn with_payload_size(mut self, value: usize) -> Self {
        self.payload_size = value;

        self
    }

    pub fn units(&self) -> usize {
        self.units.unwrap_or(self.capacity * 2)
    }

    pub fn with_units(mut self, value: usize) -> Self {
        self.units = Some(value);

        self
    }
}
