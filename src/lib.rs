// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! FoosGate - Foosball goal detection and live score streaming
//!
//! Beam-break photogates in each goal mouth are debounced into single
//! `scored` events, which are fanned out to every connected scoreboard over a
//! long-lived chunked HTTP stream. Every goal also keeps the table's fans awake;
//! after a period of inactivity they are switched off.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  raw changes  ┌──────────┐  detections  ┌────────────┐
//! │ InterfaceKit │ ────────────→ │  Gates   │ ───────────→ │   Engine   │
//! └──────────────┘               └──────────┘              └────────────┘
//!                                                  touch ↙        ↘ publish
//!                                          ┌───────────┐    ┌───────────┐
//!                                          │ IdleTimer │    │ Event Bus │
//!                                          └───────────┘    └───────────┘
//!                                                ↓ fired          ↓ ordered
//!                                          ┌───────────┐    ┌───────────┐
//!                                          │   Fans    │    │    Hub    │ → N streams
//!                                          └───────────┘    └───────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod core;
pub mod gate;
pub mod hardware;
pub mod streaming;
pub mod timer;

// Re-exports for convenience
pub use config::Config;
pub use self::core::{Engine, Event, EventBus, StatusHandle, SystemState};
pub use gate::{Detection, Gate, GateError, GateSettings};
pub use hardware::{InterfaceKit, PowerSwitch};
pub use streaming::{BroadcastHub, StreamServer};
pub use timer::IdleTimer;

/// FoosGate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
