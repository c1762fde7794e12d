// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Hardware collaborators - interface boards and switched appliances
//!
//! The driver layer itself lives outside this crate. Gates only ever talk to
//! an [`InterfaceKit`], and the idle timer only ever talks to [`PowerSwitch`]es.

mod simulator;

pub use simulator::{spawn_crossings, SimulatedFan, SimulatedInterfaceKit};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Errors reported by a hardware driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("channel {0} does not exist on this device")]
    UnknownChannel(usize),

    #[error("device is not attached")]
    Detached,

    #[error("device I/O failed: {0}")]
    Io(String),
}

/// A raw change notification from one sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorChange {
    pub channel: usize,
    pub value: i32,
    /// Time the driver observed the change
    pub at: Instant,
}

/// Digital outputs and analog sensors of one interface board.
///
/// Output `n` drives the emitter paired with sensor `n`. Every call may block on
/// the device for a bounded time (hundreds of milliseconds at most).
#[async_trait]
pub trait InterfaceKit: Send + Sync {
    /// Number of paired output/sensor channels
    fn channel_count(&self) -> usize;

    /// Turn a digital output on or off
    async fn set_output_state(&self, channel: usize, state: bool) -> Result<(), HardwareError>;

    /// Minimum value delta that produces a change notification
    async fn set_change_trigger(&self, channel: usize, threshold: u32) -> Result<(), HardwareError>;

    /// Sensor sampling rate, in driver-defined units
    async fn set_data_rate(&self, channel: usize, rate: u32) -> Result<(), HardwareError>;

    /// Sample the current sensor value
    async fn read_value(&self, channel: usize) -> Result<i32, HardwareError>;

    /// Stream of raw change notifications for one sensor
    fn subscribe_changes(
        &self,
        channel: usize,
    ) -> Result<broadcast::Receiver<SensorChange>, HardwareError>;
}

/// Power state of a switched appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

/// An appliance that is powered off after a period of inactivity
#[async_trait]
pub trait PowerSwitch: Send + Sync {
    fn name(&self) -> &str;

    async fn set_power(&self, state: PowerState) -> Result<(), HardwareError>;
}
