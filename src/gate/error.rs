use std::result;

use thiserror::Error;

use crate::hardware::HardwareError;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Gate `{gate}` has no channels")]
    NoChannels { gate: String },

    #[error("Photogate failure on `{gate}` (index: {channel}, before: {before}, after: {after})")]
    SelfCheckFailed {
        gate: String,
        channel: usize,
        before: i32,
        after: i32,
    },

    #[error("Hardware error on `{gate}` channel {channel}: {source}")]
    Hardware {
        gate: String,
        channel: usize,
        #[source]
        source: HardwareError,
    },
}

impl GateError {
    pub(super) fn hardware(gate: &str, channel: usize, source: HardwareError) -> Self {
        Self::Hardware {
            gate: gate.to_string(),
            channel,
            source,
        }
    }

    /// Whether the error means the gate's wiring or hardware cannot be trusted
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, Self::SelfCheckFailed { .. } | Self::Hardware { .. })
    }
}

pub type Result<T> = result::Result<T, GateError>;
