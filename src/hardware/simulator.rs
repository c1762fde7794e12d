// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Simulated hardware for demo mode and testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::prelude::*;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use super::{HardwareError, InterfaceKit, PowerState, PowerSwitch, SensorChange};

/// Sensor value with the emitter off
const AMBIENT_LEVEL: i32 = 80;
/// Sensor value with the emitter on and the beam unbroken
const LIT_LEVEL: i32 = 620;
/// Change notifications buffered per channel
const CHANGE_CAPACITY: usize = 64;

struct Channel {
    output: bool,
    change_trigger: u32,
    data_rate: u32,
    ambient: i32,
    lit: i32,
    fail_reads: bool,
    fail_lit_reads: bool,
    changes: broadcast::Sender<SensorChange>,
}

impl Channel {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            output: false,
            change_trigger: 0,
            data_rate: 0,
            ambient: AMBIENT_LEVEL,
            lit: LIT_LEVEL,
            fail_reads: false,
            fail_lit_reads: false,
            changes,
        }
    }
}

/// In-process interface kit.
///
/// Reads return the lit level while a channel's output is on and the ambient
/// level otherwise. Change notifications are only produced by [`inject_change`].
///
/// [`inject_change`]: SimulatedInterfaceKit::inject_change
pub struct SimulatedInterfaceKit {
    channels: Mutex<Vec<Channel>>,
}

impl SimulatedInterfaceKit {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: Mutex::new((0..channel_count).map(|_| Channel::new()).collect()),
        }
    }

    fn with_channel<T>(
        &self,
        channel: usize,
        f: impl FnOnce(&mut Channel) -> T,
    ) -> Result<T, HardwareError> {
        let mut channels = self.channels.lock();
        channels
            .get_mut(channel)
            .map(f)
            .ok_or(HardwareError::UnknownChannel(channel))
    }

    /// Deliver a change notification stamped with the current time
    pub fn inject_change(&self, channel: usize, value: i32) -> bool {
        self.inject_change_at(channel, value, Instant::now())
    }

    /// Deliver a change notification with an explicit timestamp.
    ///
    /// Returns `false` when the channel does not exist or nobody listens on it.
    pub fn inject_change_at(&self, channel: usize, value: i32, at: Instant) -> bool {
        self.with_channel(channel, |c| {
            c.changes
                .send(SensorChange { channel, value, at })
                .is_ok()
        })
        .unwrap_or(false)
    }

    /// Override the ambient and lit levels of a channel, e.g. to model a dead emitter
    pub fn set_levels(&self, channel: usize, ambient: i32, lit: i32) {
        let _ = self.with_channel(channel, |c| {
            c.ambient = ambient;
            c.lit = lit;
        });
    }

    /// Make every read on a channel fail
    pub fn fail_reads(&self, channel: usize, fail: bool) {
        let _ = self.with_channel(channel, |c| c.fail_reads = fail);
    }

    /// Make reads on a channel fail only while its output is on
    pub fn fail_lit_reads(&self, channel: usize, fail: bool) {
        let _ = self.with_channel(channel, |c| c.fail_lit_reads = fail);
    }

    pub fn output_state(&self, channel: usize) -> Option<bool> {
        self.with_channel(channel, |c| c.output).ok()
    }

    pub fn change_trigger(&self, channel: usize) -> Option<u32> {
        self.with_channel(channel, |c| c.change_trigger).ok()
    }

    pub fn data_rate(&self, channel: usize) -> Option<u32> {
        self.with_channel(channel, |c| c.data_rate).ok()
    }
}

#[async_trait]
impl InterfaceKit for SimulatedInterfaceKit {
    fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    async fn set_output_state(&self, channel: usize, state: bool) -> Result<(), HardwareError> {
        self.with_channel(channel, |c| c.output = state)
    }

    async fn set_change_trigger(&self, channel: usize, threshold: u32) -> Result<(), HardwareError> {
        self.with_channel(channel, |c| c.change_trigger = threshold)
    }

    async fn set_data_rate(&self, channel: usize, rate: u32) -> Result<(), HardwareError> {
        self.with_channel(channel, |c| c.data_rate = rate)
    }

    async fn read_value(&self, channel: usize) -> Result<i32, HardwareError> {
        self.with_channel(channel, |c| {
            if c.fail_reads || (c.output && c.fail_lit_reads) {
                Err(HardwareError::Io(format!("simulated read failure on sensor {}", channel)))
            } else if c.output {
                Ok(c.lit)
            } else {
                Ok(c.ambient)
            }
        })?
    }

    fn subscribe_changes(
        &self,
        channel: usize,
    ) -> Result<broadcast::Receiver<SensorChange>, HardwareError> {
        self.with_channel(channel, |c| c.changes.subscribe())
    }
}

/// Simulated fan that records its power state
pub struct SimulatedFan {
    name: String,
    power: Mutex<PowerState>,
    switches: AtomicUsize,
}

impl SimulatedFan {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            power: Mutex::new(PowerState::On),
            switches: AtomicUsize::new(0),
        }
    }

    pub fn power(&self) -> PowerState {
        *self.power.lock()
    }

    /// Number of `set_power` calls received
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PowerSwitch for SimulatedFan {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_power(&self, state: PowerState) -> Result<(), HardwareError> {
        *self.power.lock() = state;
        self.switches.fetch_add(1, Ordering::Relaxed);
        debug!("Simulated fan '{}' switched {:?}", self.name, state);
        Ok(())
    }
}

/// Periodically simulate a ball crossing one of the given gates.
///
/// Each crossing is a burst of chattering notifications spread over the
/// gate's channels, the way a real beam break bounces across sensors.
pub fn spawn_crossings(
    kit: Arc<SimulatedInterfaceKit>,
    gates: Vec<Vec<usize>>,
    mean_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let mean_ms = mean_interval.as_millis().max(1) as u64;

        loop {
            let wait = rng.gen_range(mean_ms / 2..=mean_ms + mean_ms / 2);
            sleep(Duration::from_millis(wait)).await;

            let Some(channels) = gates.choose(&mut rng) else {
                return;
            };
            if channels.is_empty() {
                continue;
            }

            let bounces = rng.gen_range(2..=5);
            trace!("Simulating crossing on channels {:?} ({} bounces)", channels, bounces);
            for _ in 0..bounces {
                if let Some(&channel) = channels.choose(&mut rng) {
                    let value = LIT_LEVEL - rng.gen_range(200..500);
                    kit.inject_change(channel, value);
                }
                sleep(Duration::from_millis(rng.gen_range(5..40))).await;
            }
        }
    })
}
