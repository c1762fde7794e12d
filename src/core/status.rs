//! Read-side view of a running engine, shared with the HTTP server

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{EventBus, SystemState};
use crate::gate::Gate;
use crate::streaming::BroadcastHub;

/// Cheap, cloneable handle onto the gates, bus and hub of an engine
#[derive(Clone)]
pub struct StatusHandle {
    gates: Arc<[Arc<Gate>]>,
    bus: EventBus,
    hub: BroadcastHub,
    started: Arc<Mutex<Option<Instant>>>,
}

impl StatusHandle {
    pub fn new(gates: Vec<Arc<Gate>>, bus: EventBus, hub: BroadcastHub) -> Self {
        Self {
            gates: gates.into(),
            bus,
            hub,
            started: Arc::new(Mutex::new(None)),
        }
    }

    pub fn gates(&self) -> &[Arc<Gate>] {
        &self.gates
    }

    pub fn gate(&self, name: &str) -> Option<&Arc<Gate>> {
        self.gates.iter().find(|g| g.name() == name)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub(crate) fn set_running(&self, running: bool) {
        *self.started.lock() = running.then(Instant::now);
    }

    pub fn is_running(&self) -> bool {
        self.started.lock().is_some()
    }

    pub fn uptime(&self) -> u64 {
        self.started.lock().map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn state(&self) -> SystemState {
        let gates: Vec<_> = self.gates.iter().map(|g| g.status()).collect();

        SystemState {
            running: self.is_running(),
            gates_active: gates.iter().filter(|g| g.active).count(),
            total_detections: gates.iter().map(|g| g.detections).sum(),
            events_published: self.bus.published(),
            events_dropped: self.bus.dropped(),
            subscribers: self.hub.subscriber_count(),
            uptime_seconds: self.uptime(),
            gates,
        }
    }
}
