//! Controller configuration and defaults.

use std::str::FromStr;

use anyhow::{Context, Result};

use crate::can::MotorCommand;

/// CAN interface name
pub const DEFAULT_INTERFACE: &str = "can0";

/// CAN bitrate [bps]
pub const DEFAULT_BITRATE: u32 = 1_000_000;

/// Motor addresses on the bus
pub const DEFAULT_MOTOR_IDS: [u8; 1] = [1];

/// Reply timeout per exchange [ms]
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u32 = 3;

/// Send attempts while the transmit queue is full
pub const DEFAULT_SEND_ATTEMPTS: u32 = 5;

/// Wait between send attempts [ms]
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Control command period [μs]
pub const DEFAULT_CONTROL_PERIOD_US: u64 = 1_000;

/// Status word poll period [ms]
pub const DEFAULT_STATUS_PERIOD_MS: u64 = 1_000;

/// Control loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub interface: String,
    pub bitrate: u32,
    /// Run `ip link` to set the bitrate and bring the interface up first
    pub setup_interface: bool,
    /// Run `ip` through `sudo` during setup
    pub use_sudo: bool,
    pub motor_ids: Vec<u8>,
    pub receive_timeout_ms: u32,
    pub send_attempts: u32,
    pub retry_backoff_ms: u64,
    pub control_period_us: u64,
    pub status_period_ms: u64,
    /// Command sent to every motor each control period
    pub command: MotorCommand,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            bitrate: DEFAULT_BITRATE,
            setup_interface: false,
            use_sudo: true,
            motor_ids: DEFAULT_MOTOR_IDS.to_vec(),
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            control_period_us: DEFAULT_CONTROL_PERIOD_US,
            status_period_ms: DEFAULT_STATUS_PERIOD_MS,
            command: MotorCommand {
                position: 5.0,
                velocity: 0.0,
                torque: 0.0,
                kp: 5.0,
                kd: 0.0,
            },
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", name, raw))
        })
        .transpose()
}

fn parse_list<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Vec<T>>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.split(',')
                .map(|item| {
                    item.trim()
                        .parse::<T>()
                        .with_context(|| format!("Invalid value for {}: {:?}", name, raw))
                })
                .collect::<Result<Vec<T>>>()
        })
        .transpose()
}

impl ControllerConfig {
    /// Defaults overridden by `DEEP_MOTOR_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup
    ///
    /// `DEEP_MOTOR_COMMAND` takes five comma-separated values:
    /// position, velocity, torque, kp, kd.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(interface) = lookup("DEEP_MOTOR_INTERFACE") {
            self.interface = interface.trim().to_string();
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_BITRATE")? {
            self.bitrate = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_SETUP_INTERFACE")? {
            self.setup_interface = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_USE_SUDO")? {
            self.use_sudo = v;
        }
        if let Some(v) = parse_list(&lookup, "DEEP_MOTOR_IDS")? {
            self.motor_ids = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_RECEIVE_TIMEOUT_MS")? {
            self.receive_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_SEND_ATTEMPTS")? {
            self.send_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_CONTROL_PERIOD_US")? {
            self.control_period_us = v;
        }
        if let Some(v) = parse_var(&lookup, "DEEP_MOTOR_STATUS_PERIOD_MS")? {
            self.status_period_ms = v;
        }
        if let Some(values) = parse_list::<f64>(&lookup, "DEEP_MOTOR_COMMAND")? {
            let [position, velocity, torque, kp, kd] = values[..] else {
                anyhow::bail!(
                    "DEEP_MOTOR_COMMAND expects 5 values (position,velocity,torque,kp,kd), got {}",
                    values.len()
                );
            };
            self.command = MotorCommand {
                position,
                velocity,
                torque,
                kp,
                kd,
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.motor_ids.is_empty() {
            anyhow::bail!("No motor ids configured");
        }
        if let Some(id) = self.motor_ids.iter().find(|&&id| id > 0x1F) {
            anyhow::bail!("Motor id {} does not fit the 5-bit address field", id);
        }
        if self.control_period_us == 0 || self.status_period_ms == 0 {
            anyhow::bail!("Control and status periods must be non-zero");
        }
        Ok(())
    }
}
