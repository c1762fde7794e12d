// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Photogates - debounced goal detection over several beam-break channels
//!
//! A [`Gate`] is one logical detector built from a fixed set of sensor
//! channels on an [`InterfaceKit`]. Each channel is listened to by its own
//! task; any of them may fire, and chatter across all of them inside the
//! cool-down window collapses into a single [`Detection`].

mod debounce;
mod error;

pub use debounce::Debouncer;
pub use error::{GateError, Result};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::hardware::{InterfaceKit, SensorChange};

pub const DEFAULT_COOL_DOWN: Duration = Duration::from_millis(500);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_SENSITIVITY: u32 = 25;
pub const DEFAULT_DATA_RATE: u32 = 16;

/// Timing and sensor settings of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// Minimum spacing between accepted detections
    pub cool_down: Duration,
    /// Wait after switching emitters before readings are trusted
    pub settle_delay: Duration,
    /// Change trigger threshold applied to every channel
    pub sensitivity: u32,
    /// Sensor data rate applied to every channel
    pub data_rate: u32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            cool_down: DEFAULT_COOL_DOWN,
            settle_delay: DEFAULT_SETTLE_DELAY,
            sensitivity: DEFAULT_SENSITIVITY,
            data_rate: DEFAULT_DATA_RATE,
        }
    }
}

/// One accepted, debounced detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub gate: String,
    /// Channel whose notification was accepted
    pub channel: usize,
    pub at: Instant,
}

/// Snapshot of a gate for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub name: String,
    pub channels: Vec<usize>,
    pub sensitivity: u32,
    pub data_rate: u32,
    pub active: bool,
    /// Detections delivered to the engine
    pub detections: u64,
    /// Detections lost to a full detection queue
    pub dropped: u64,
    pub last_detected_at: Option<DateTime<Utc>>,
}

struct DetectionState {
    debouncer: Debouncer,
    last_detected_at: Option<DateTime<Utc>>,
}

/// State shared between the gate and its channel listeners
struct Shared {
    name: String,
    active: AtomicBool,
    detections_total: AtomicU64,
    detections_dropped: AtomicU64,
    state: Mutex<DetectionState>,
    detections: mpsc::Sender<Detection>,
}

impl Shared {
    fn on_change(&self, change: SensorChange) {
        // `active` is only cleared under this lock, so nothing is emitted after deactivation
        let mut state = self.state.lock();
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if !state.debouncer.accept(change.at) {
            trace!("Gate '{}' ignored bounce on channel {}", self.name, change.channel);
            return;
        }

        let detection = Detection {
            gate: self.name.clone(),
            channel: change.channel,
            at: change.at,
        };

        // Never wait on the consumer: a stalled queue must not stall the listener
        match self.detections.try_send(detection) {
            Ok(()) => {
                state.last_detected_at = Some(Utc::now());
                self.detections_total.fetch_add(1, Ordering::Relaxed);
                debug!("Gate '{}' detected on channel {}", self.name, change.channel);
            }
            Err(TrySendError::Full(d)) => {
                self.detections_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Detection queue full, dropping detection from gate '{}'", d.gate);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Detection queue closed, gate '{}' detection discarded", self.name);
            }
        }
    }
}

async fn listen(shared: Arc<Shared>, channel: usize, mut changes: broadcast::Receiver<SensorChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => shared.on_change(change),
            Err(RecvError::Lagged(skipped)) => {
                trace!(
                    "Gate '{}' channel {} lagged, {} notifications skipped",
                    shared.name, channel, skipped
                );
            }
            Err(RecvError::Closed) => {
                debug!("Change notifications closed for gate '{}' channel {}", shared.name, channel);
                break;
            }
        }
    }
}

/// A logical photogate over a fixed set of channels
pub struct Gate {
    name: String,
    channels: Vec<usize>,
    kit: Arc<dyn InterfaceKit>,
    settle_delay: Duration,
    sensitivity: AtomicU32,
    data_rate: AtomicU32,
    shared: Arc<Shared>,
    listeners: Vec<JoinHandle<()>>,
}

impl Gate {
    /// Configure the gate's channels and start listening for changes.
    ///
    /// Outputs are driven off; the gate starts inactive. Accepted detections
    /// are sent to `detections` without ever blocking.
    pub async fn attach(
        name: &str,
        kit: Arc<dyn InterfaceKit>,
        channels: Vec<usize>,
        settings: GateSettings,
        detections: mpsc::Sender<Detection>,
    ) -> Result<Self> {
        if channels.is_empty() {
            return Err(GateError::NoChannels {
                gate: name.to_string(),
            });
        }

        for &channel in &channels {
            kit.set_output_state(channel, false)
                .await
                .map_err(|e| GateError::hardware(name, channel, e))?;
            kit.set_change_trigger(channel, settings.sensitivity)
                .await
                .map_err(|e| GateError::hardware(name, channel, e))?;
            kit.set_data_rate(channel, settings.data_rate)
                .await
                .map_err(|e| GateError::hardware(name, channel, e))?;
        }

        let shared = Arc::new(Shared {
            name: name.to_string(),
            active: AtomicBool::new(false),
            detections_total: AtomicU64::new(0),
            detections_dropped: AtomicU64::new(0),
            state: Mutex::new(DetectionState {
                debouncer: Debouncer::new(settings.cool_down),
                last_detected_at: None,
            }),
            detections,
        });

        let subscriptions = channels
            .iter()
            .map(|&channel| {
                kit.subscribe_changes(channel)
                    .map(|changes| (channel, changes))
                    .map_err(|e| GateError::hardware(name, channel, e))
            })
            .collect::<Result<Vec<_>>>()?;
        let listeners = subscriptions
            .into_iter()
            .map(|(channel, changes)| tokio::spawn(listen(shared.clone(), channel, changes)))
            .collect();

        debug!("Gate '{}' attached to channels {:?}", name, channels);

        Ok(Self {
            name: name.to_string(),
            channels,
            kit,
            settle_delay: settings.settle_delay,
            sensitivity: AtomicU32::new(settings.sensitivity),
            data_rate: AtomicU32::new(settings.data_rate),
            shared,
            listeners,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn sensitivity(&self) -> u32 {
        self.sensitivity.load(Ordering::Relaxed)
    }

    async fn set_outputs(&self, state: bool) -> Result<()> {
        for &channel in &self.channels {
            self.kit
                .set_output_state(channel, state)
                .await
                .map_err(|e| GateError::hardware(&self.name, channel, e))?;
        }
        Ok(())
    }

    /// Turn the emitters on and start honoring detections once they settle
    pub async fn activate(&self) -> Result<()> {
        self.set_outputs(true).await?;
        sleep(self.settle_delay).await;
        self.shared.active.store(true, Ordering::Release);

        info!("Gate '{}' activated", self.name);
        Ok(())
    }

    /// Stop honoring detections, then turn the emitters off once settled
    pub async fn deactivate(&self) -> Result<()> {
        {
            let _state = self.shared.state.lock();
            self.shared.active.store(false, Ordering::Release);
        }
        sleep(self.settle_delay).await;
        self.set_outputs(false).await?;

        info!("Gate '{}' deactivated", self.name);
        Ok(())
    }

    /// Check every channel's emitter/sensor pair.
    ///
    /// Each sensor is sampled with its emitter off and then on; the lit sample
    /// must be strictly greater. A failure means the gate cannot be trusted.
    pub async fn self_test(&self) -> Result<()> {
        for &channel in &self.channels {
            let hw = |e| GateError::hardware(&self.name, channel, e);

            self.kit.set_output_state(channel, false).await.map_err(hw)?;
            sleep(self.settle_delay).await;
            let before = self.kit.read_value(channel).await.map_err(hw)?;

            self.kit.set_output_state(channel, true).await.map_err(hw)?;
            sleep(self.settle_delay).await;
            let lit = self.kit.read_value(channel).await;

            // The emitter goes back off even when the lit read failed
            let off = self.kit.set_output_state(channel, false).await;
            let after = lit.map_err(hw)?;
            off.map_err(hw)?;

            if after <= before {
                error!(
                    "Gate '{}' failed self-check (index: {}, before: {}, after: {})",
                    self.name, channel, before, after
                );
                return Err(GateError::SelfCheckFailed {
                    gate: self.name.clone(),
                    channel,
                    before,
                    after,
                });
            }
            debug!(
                "Gate '{}' channel {} passed self-check ({} -> {})",
                self.name, channel, before, after
            );
        }

        info!("Gate '{}' is good", self.name);
        Ok(())
    }

    /// Apply a new change trigger threshold to every channel.
    ///
    /// Debounce state and activation are left untouched.
    pub async fn update(&self, sensitivity: u32) -> Result<()> {
        self.sensitivity.store(sensitivity, Ordering::Relaxed);
        self.reapply().await?;

        info!("Gate '{}' sensitivity set to {}", self.name, sensitivity);
        Ok(())
    }

    /// Apply a new sensor data rate to every channel
    pub async fn set_data_rate(&self, rate: u32) -> Result<()> {
        self.data_rate.store(rate, Ordering::Relaxed);
        self.reapply().await?;

        info!("Gate '{}' data rate set to {}", self.name, rate);
        Ok(())
    }

    async fn reapply(&self) -> Result<()> {
        let sensitivity = self.sensitivity.load(Ordering::Relaxed);
        let rate = self.data_rate.load(Ordering::Relaxed);

        for &channel in &self.channels {
            let hw = |e| GateError::hardware(&self.name, channel, e);
            self.kit.set_change_trigger(channel, sensitivity).await.map_err(hw)?;
            self.kit.set_data_rate(channel, rate).await.map_err(hw)?;
        }
        Ok(())
    }

    pub fn status(&self) -> GateStatus {
        let last_detected_at = self.shared.state.lock().last_detected_at;

        GateStatus {
            name: self.name.clone(),
            channels: self.channels.clone(),
            sensitivity: self.sensitivity.load(Ordering::Relaxed),
            data_rate: self.data_rate.load(Ordering::Relaxed),
            active: self.is_active(),
            detections: self.shared.detections_total.load(Ordering::Relaxed),
            dropped: self.shared.detections_dropped.load(Ordering::Relaxed),
            last_detected_at,
        }
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}
