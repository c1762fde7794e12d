// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Configuration module

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gate::{GateSettings, DEFAULT_DATA_RATE, DEFAULT_SENSITIVITY};
use crate::streaming::StreamingConfig;
use crate::timer::DEFAULT_IDLE_TIMEOUT;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when no CLI flag overrides it
    pub log_level: String,

    /// Use simulated hardware
    pub demo_mode: bool,

    /// Gate channel assignments
    pub gates: Vec<GateConfig>,

    /// Settings shared by every gate
    pub gate: PhotogateConfig,

    /// Idle timer configuration
    pub timer: TimerConfig,

    /// Streaming configuration
    pub streaming: StreamingConfig,

    /// Demo mode configuration
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            demo_mode: false,
            gates: vec![
                GateConfig::new("black", vec![0, 1, 2]),
                GateConfig::new("yellow", vec![3, 4, 5]),
            ],
            gate: PhotogateConfig::default(),
            timer: TimerConfig::default(),
            streaming: StreamingConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read configuration {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            // Create parent directories
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("foosgate"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.log_level.parse::<tracing::Level>().is_err() {
            bail!("Unknown log_level '{}'", self.log_level);
        }

        if self.gates.is_empty() {
            bail!("At least one gate must be configured");
        }

        let mut names = HashSet::new();
        let mut claimed = HashSet::new();
        for gate in &self.gates {
            if gate.channels.is_empty() {
                bail!("Gate '{}' has no channels", gate.name);
            }
            if !names.insert(gate.name.as_str()) {
                bail!("Gate '{}' is configured twice", gate.name);
            }
            for &channel in &gate.channels {
                if !claimed.insert(channel) {
                    bail!("Channel {} is claimed by more than one gate", channel);
                }
            }
        }

        if self.timer.idle_timeout_secs == 0 {
            bail!("timer.idle_timeout_secs must be greater than zero");
        }
        if self.streaming.event_queue_capacity == 0 || self.streaming.subscriber_buffer == 0 {
            bail!("Streaming queue capacities must be greater than zero");
        }
        if self.streaming.write_timeout_ms == 0 || self.streaming.request_timeout_ms == 0 {
            bail!("Streaming timeouts must be greater than zero");
        }
        if self.streaming.max_clients == 0 {
            bail!("streaming.max_clients must be greater than zero");
        }

        Ok(())
    }

    /// Channels needed on the interface kit to host every gate
    pub fn channel_count(&self) -> usize {
        self.gates
            .iter()
            .flat_map(|g| g.channels.iter())
            .max()
            .map_or(0, |&c| c + 1)
    }
}

/// One gate and the channels it is built from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfig {
    pub name: String,
    pub channels: Vec<usize>,
}

impl GateConfig {
    pub fn new(name: &str, channels: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            channels,
        }
    }
}

/// Photogate timing and sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotogateConfig {
    /// Minimum spacing between detections in milliseconds
    pub cool_down_ms: u64,

    /// Emitter settle delay in milliseconds
    pub settle_delay_ms: u64,

    /// Change trigger threshold
    pub sensitivity: u32,

    /// Sensor data rate
    pub data_rate: u32,
}

impl Default for PhotogateConfig {
    fn default() -> Self {
        Self {
            cool_down_ms: 500,
            settle_delay_ms: 200,
            sensitivity: DEFAULT_SENSITIVITY,
            data_rate: DEFAULT_DATA_RATE,
        }
    }
}

impl PhotogateConfig {
    pub fn settings(&self) -> GateSettings {
        GateSettings {
            cool_down: Duration::from_millis(self.cool_down_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            sensitivity: self.sensitivity,
            data_rate: self.data_rate,
        }
    }
}

/// Idle timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Inactivity before appliances are powered off, in seconds
    pub idle_timeout_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
        }
    }
}

impl TimerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Demo mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Mean time between simulated goals in milliseconds
    pub crossing_interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            crossing_interval_ms: 8000,
        }
    }
}
