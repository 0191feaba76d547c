//! Configuration management for the PRG260 driver

use crate::protocol::MIN_FIFO_CAPACITY;
use crate::transport::WaitPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// Serial device node the PRG260 is attached to
    #[serde(default = "default_device_path")]
    pub device_path: String,

    /// Serial line speed in baud
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Size of the entropy destination region in bytes
    #[serde(default = "default_entropy_port_size")]
    pub entropy_port_size: usize,

    /// Capacity of the inbound FIFO in bytes
    #[serde(default = "default_fifo_capacity")]
    pub fifo_capacity: usize,

    /// Reply deadline in milliseconds (0 = block until the device answers)
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Sleep between FIFO polls in microseconds (0 = busy spin)
    #[serde(default)]
    pub poll_interval_us: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            baud_rate: default_baud_rate(),
            entropy_port_size: default_entropy_port_size(),
            fifo_capacity: default_fifo_capacity(),
            read_timeout_ms: 0,
            poll_interval_us: 0,
        }
    }
}

impl DriverConfig {
    /// Load configuration from `PRG260_*` environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("PRG260_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.device_path.is_empty() {
            return Err(Error::Config("device_path cannot be empty".to_string()));
        }

        if self.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be greater than 0".to_string()));
        }

        if self.entropy_port_size < crate::ENTROPY_QUANTUM {
            return Err(Error::Config(format!(
                "entropy_port_size must be at least {}",
                crate::ENTROPY_QUANTUM
            )));
        }

        // The get-key status and payload may both sit in the FIFO at once
        if self.fifo_capacity < MIN_FIFO_CAPACITY {
            return Err(Error::Config(format!(
                "fifo_capacity must be at least {} to hold a get-key reply",
                MIN_FIFO_CAPACITY
            )));
        }

        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_us > 0).then(|| Duration::from_micros(self.poll_interval_us))
    }

    /// Wait policy described by this configuration
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            deadline: self.read_timeout(),
            poll_interval: self.poll_interval(),
            cancel: None,
        }
    }
}

// Default value functions
fn default_device_path() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    crate::DEFAULT_BAUD_RATE
}

fn default_entropy_port_size() -> usize {
    crate::DEFAULT_ENTROPY_PORT_SIZE
}

fn default_fifo_capacity() -> usize {
    crate::DEFAULT_FIFO_CAPACITY
}
