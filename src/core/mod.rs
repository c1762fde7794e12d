//! Core module - event bus and the engine that wires gates, timer and hub

mod engine;
mod event_bus;
mod status;

pub use engine::Engine;
pub use status::StatusHandle;
pub use event_bus::{Event, EventBus, EventStream, EventType, PublishError, FRAME_DELIMITER};

use serde::Serialize;

use crate::gate::GateStatus;

/// System-wide state
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemState {
    pub running: bool,
    pub gates_active: usize,
    pub total_detections: u64,
    pub events_published: u64,
    pub events_dropped: u64,
    pub subscribers: usize,
    pub uptime_seconds: u64,
    pub gates: Vec<GateStatus>,
}
