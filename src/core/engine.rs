//! Engine - wires gates, the idle timer, the event bus and the broadcast hub

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::{join_all, try_join_all};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{Event, EventBus, EventStream, StatusHandle, SystemState};
use crate::config::Config;
use crate::gate::{Detection, Gate};
use crate::hardware::{InterfaceKit, PowerState, PowerSwitch};
use crate::streaming::BroadcastHub;
use crate::timer::IdleTimer;

/// Detections buffered between gates and the scoring task
const DETECTION_QUEUE: usize = 32;

/// Main FoosGate engine
pub struct Engine {
    pub config: Arc<Config>,
    status: StatusHandle,
    appliances: Vec<Arc<dyn PowerSwitch>>,
    timer: Arc<IdleTimer>,
    detections: Option<mpsc::Receiver<Detection>>,
    events: Option<EventStream>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Attach every configured gate to `kit`. Nothing is activated yet.
    pub async fn new(
        config: Config,
        kit: Arc<dyn InterfaceKit>,
        appliances: Vec<Arc<dyn PowerSwitch>>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let (detections_tx, detections) = mpsc::channel(DETECTION_QUEUE);
        let settings = config.gate.settings();

        let mut gates = Vec::with_capacity(config.gates.len());
        for gate in &config.gates {
            let attached = Gate::attach(
                &gate.name,
                kit.clone(),
                gate.channels.clone(),
                settings,
                detections_tx.clone(),
            )
            .await
            .with_context(|| format!("Unable to attach gate '{}'", gate.name))?;
            gates.push(Arc::new(attached));
        }

        let (bus, events) = EventBus::new(config.streaming.event_queue_capacity);
        let hub = BroadcastHub::new(config.streaming.hub_config());
        let timer = Arc::new(IdleTimer::new(config.timer.idle_timeout()));

        Ok(Self {
            config,
            status: StatusHandle::new(gates, bus, hub),
            appliances,
            timer,
            detections: Some(detections),
            events: Some(events),
            tasks: Vec::new(),
        })
    }

    /// Self-check every gate, activate them and start delivering events.
    ///
    /// A failed self-check aborts startup before anything is served.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting FoosGate engine...");

        for gate in self.gates() {
            gate.self_test()
                .await
                .with_context(|| format!("{} photogate is bad", gate.name()))?;
        }

        let (Some(detections), Some(events)) = (self.detections.take(), self.events.take()) else {
            anyhow::bail!("Engine already started");
        };

        self.tasks.push(tokio::spawn(self.status.hub().clone().run(events)));
        self.tasks.push(tokio::spawn(score_loop(
            detections,
            self.status.bus().clone(),
            self.timer.clone(),
        )));
        self.tasks.push(tokio::spawn(idle_loop(
            self.timer.subscribe(),
            self.appliances.clone(),
        )));

        // Gates settle concurrently
        try_join_all(self.gates().iter().map(|gate| gate.activate()))
            .await
            .context("Unable to activate gates")?;

        self.timer.touch();
        self.status.set_running(true);
        info!("FoosGate engine started");
        Ok(())
    }

    /// Deactivate gates and drop every subscriber
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping FoosGate engine...");

        let results = join_all(self.gates().iter().map(|gate| gate.deactivate())).await;
        for (gate, result) in self.gates().iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to deactivate gate '{}': {}", gate.name(), e);
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.timer.stop();

        let dropped = self.hub().shutdown().await;
        self.status.set_running(false);

        info!("FoosGate engine stopped ({} subscribers disconnected)", dropped);
        Ok(())
    }

    pub fn hub(&self) -> &BroadcastHub {
        self.status.hub()
    }

    pub fn bus(&self) -> &EventBus {
        self.status.bus()
    }

    pub fn gates(&self) -> &[Arc<Gate>] {
        self.status.gates()
    }

    pub fn gate(&self, name: &str) -> Option<&Arc<Gate>> {
        self.status.gate(name)
    }

    /// Handle for serving gate and system status while the engine runs
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn uptime(&self) -> u64 {
        self.status.uptime()
    }

    pub fn state(&self) -> SystemState {
        self.status.state()
    }
}

/// Publish a `scored` event for every detection and keep the appliances awake
async fn score_loop(
    mut detections: mpsc::Receiver<Detection>,
    bus: EventBus,
    timer: Arc<IdleTimer>,
) {
    while let Some(detection) = detections.recv().await {
        match bus.publish(Event::scored(&detection.gate)) {
            Ok(()) => info!("{} scored", detection.gate),
            Err(e) => warn!("Score for '{}' not published: {}", detection.gate, e),
        }
        timer.touch();
    }
}

/// Power appliances off each time the idle timer fires
async fn idle_loop(mut fired: broadcast::Receiver<()>, appliances: Vec<Arc<dyn PowerSwitch>>) {
    loop {
        match fired.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => {
                info!("Idle timeout reached, turning appliances off");
                for appliance in &appliances {
                    if let Err(e) = appliance.set_power(PowerState::Off).await {
                        warn!("Unable to turn '{}' off: {}", appliance.name(), e);
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateError;
    use crate::hardware::{SimulatedFan, SimulatedInterfaceKit};
    use crate::streaming::FrameSink;
    use async_trait::async_trait;
    use std::io;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug)]
    struct RecordingSink {
        frames: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.frames
                .send(frame.to_vec())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.timer.idle_timeout_secs = 60;
        config
    }

    async fn engine_with(
        config: Config,
    ) -> (Engine, Arc<SimulatedInterfaceKit>, Arc<SimulatedFan>) {
        let kit = Arc::new(SimulatedInterfaceKit::new(config.channel_count()));
        let fan = Arc::new(SimulatedFan::new("yellow-fan"));
        let engine = Engine::new(config, kit.clone(), vec![fan.clone() as Arc<dyn PowerSwitch>])
            .await
            .unwrap();
        (engine, kit, fan)
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_reaches_subscribers() {
        let (mut engine, kit, _fan) = engine_with(test_config()).await;
        engine.start().await.unwrap();

        let (frames, mut rx) = mpsc::unbounded_channel();
        engine.hub().subscribe(RecordingSink { frames }).unwrap();

        // Chatter on the yellow gate
        kit.inject_change(4, 200);
        kit.inject_change(3, 210);

        let frame = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, b"{\"type\":\"scored\",\"team\":\"yellow\"}\r\n");
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.is_err());

        let state = engine.state();
        assert!(state.running);
        assert_eq!(state.gates_active, 2);
        assert_eq!(state.total_detections, 1);
        assert_eq!(state.events_published, 1);
        assert_eq!(engine.gate("yellow").unwrap().status().detections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_check_failure_aborts_start() {
        let (mut engine, kit, _fan) = engine_with(test_config()).await;
        kit.set_levels(4, 300, 120);

        let err = engine.start().await.unwrap_err();
        let gate_err = err.downcast_ref::<GateError>().unwrap();
        assert!(matches!(
            gate_err,
            GateError::SelfCheckFailed { channel: 4, before: 300, after: 120, .. }
        ));
        assert!(engine.gates().iter().all(|g| !g.is_active()));
        assert!(!engine.state().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_turns_appliances_off() {
        let (mut engine, kit, fan) = engine_with(test_config()).await;
        engine.start().await.unwrap();
        assert_eq!(fan.power(), PowerState::On);

        tokio::time::sleep(Duration::from_secs(45)).await;
        kit.inject_change(0, 200);
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(fan.power(), PowerState::On);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fan.power(), PowerState::Off);
        assert_eq!(fan.switch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_deactivates_gates() {
        let (mut engine, kit, _fan) = engine_with(test_config()).await;
        engine.start().await.unwrap();

        let (frames, mut rx) = mpsc::unbounded_channel();
        engine.hub().subscribe(RecordingSink { frames }).unwrap();

        engine.stop().await.unwrap();

        assert!(engine.gates().iter().all(|g| !g.is_active()));
        assert_eq!(kit.output_state(0), Some(false));
        assert_eq!(engine.hub().subscriber_count(), 0);
        assert!(!engine.state().running);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.gates[1].channels = vec![0];
        let kit = Arc::new(SimulatedInterfaceKit::new(6));

        assert!(Engine::new(config, kit, vec![]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let (mut engine, _kit, _fan) = engine_with(test_config()).await;
        engine.start().await.unwrap();

        assert!(engine.start().await.is_err());
    }
}
