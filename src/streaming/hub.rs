// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Broadcast hub - fans the serialized event stream out to live subscribers

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::EventStream;

/// One serialized event, shared by every subscriber's mailbox
pub type Frame = Arc<[u8]>;

/// Writable end of a subscriber connection.
///
/// An error means the subscriber is gone; it is never retried.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Called once before the first frame
    async fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Called once the subscriber has been removed from the hub
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stable identity of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Subscribers allowed at once
    pub max_subscribers: usize,
    /// Frames queued per subscriber before it is considered stalled
    pub subscriber_buffer: usize,
    /// Upper bound for a single frame write
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 64,
            subscriber_buffer: 16,
            write_timeout: Duration::from_secs(2),
        }
    }
}

struct Subscriber {
    mailbox: mpsc::Sender<Frame>,
    writer: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<SubscriberId, Subscriber>>>;

/// Registry of live subscribers plus the serializer that feeds them.
///
/// Every subscriber gets its own writer task and bounded mailbox, so writes for
/// one event run concurrently across subscribers while each subscriber still
/// sees frames in publish order. The registry is keyed by identity and only
/// touched under its mutex.
#[derive(Clone)]
pub struct BroadcastHub {
    registry: Registry,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Register a connection and start its writer.
    ///
    /// Hands `sink` back when `max_subscribers` are already registered.
    pub fn subscribe<S: FrameSink>(&self, sink: S) -> Result<SubscriberId, S> {
        let mut registry = self.registry.lock();
        if registry.len() >= self.config.max_subscribers {
            debug!("Hub full ({} subscribers), rejecting subscriber", registry.len());
            return Err(sink);
        }

        let mut id = SubscriberId(Uuid::new_v4());
        while registry.contains_key(&id) {
            id = SubscriberId(Uuid::new_v4());
        }

        let (mailbox, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let writer = tokio::spawn(write_loop(
            id,
            sink,
            rx,
            self.registry.clone(),
            self.config.write_timeout,
        ));
        registry.insert(id, Subscriber { mailbox, writer });

        info!("Subscriber {} registered", id);
        Ok(id)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.registry.lock().remove(&id).is_some();
        if removed {
            info!("Subscriber {} unsubscribed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry.lock().contains_key(&id)
    }

    /// Remove every subscriber and wait for their writers to close the streams.
    ///
    /// Writers still busy after `write_timeout` are aborted. Returns how many
    /// subscribers were removed.
    pub async fn shutdown(&self) -> usize {
        let writers: Vec<JoinHandle<()>> = self
            .registry
            .lock()
            .drain()
            .map(|(_, subscriber)| subscriber.writer)
            .collect();
        let count = writers.len();

        let aborts: Vec<_> = writers.iter().map(|w| w.abort_handle()).collect();
        if time::timeout(self.config.write_timeout, join_all(writers))
            .await
            .is_err()
        {
            warn!("Subscriber writers did not finish in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        count
    }

    /// Queue a frame for every current subscriber. Returns how many accepted it.
    pub fn fan_out(&self, frame: Frame) -> usize {
        let mut registry = self.registry.lock();
        let mut stalled = Vec::new();

        for (id, subscriber) in registry.iter() {
            match subscriber.mailbox.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => stalled.push((*id, "mailbox full")),
                Err(TrySendError::Closed(_)) => stalled.push((*id, "writer gone")),
            }
        }

        for (id, reason) in &stalled {
            registry.remove(id);
            info!("Subscriber {} removed ({})", id, reason);
        }

        registry.len()
    }

    /// Drain the event stream in order, fanning each event out.
    ///
    /// Runs until every publisher of the stream has been dropped.
    pub async fn run(self, mut events: EventStream) {
        info!("Broadcast hub started");

        while let Some(event) = events.next().await {
            let frame: Frame = match event.to_frame() {
                Ok(frame) => frame.into(),
                Err(e) => {
                    error!("Failed to serialize {:?}: {}", event, e);
                    continue;
                }
            };

            let delivered = self.fan_out(frame);
            debug!("Fanned out {:?} to {} subscribers", event, delivered);
        }

        info!("Event stream closed, broadcast hub stopped");
    }
}

async fn write_loop<S: FrameSink>(
    id: SubscriberId,
    mut sink: S,
    mut mailbox: mpsc::Receiver<Frame>,
    registry: Registry,
    write_timeout: Duration,
) {
    let opened = match time::timeout(write_timeout, sink.open()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
    };
    if let Err(e) = opened {
        if registry.lock().remove(&id).is_some() {
            info!("Subscriber {} removed ({})", id, e);
        }
        return;
    }

    while let Some(frame) = mailbox.recv().await {
        let reason = match time::timeout(write_timeout, sink.write_frame(&frame)).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write timed out after {:?}", write_timeout),
        };

        // Subscriber went away; not an error for anyone else
        if registry.lock().remove(&id).is_some() {
            info!("Subscriber {} removed ({})", id, reason);
        }
        return;
    }

    match time::timeout(write_timeout, sink.close()).await {
        Ok(Ok(())) => debug!("Subscriber {} closed", id),
        Ok(Err(e)) => debug!("Subscriber {} close failed: {}", id, e),
        Err(_) => debug!("Subscriber {} close timed out", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, EventBus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    const YELLOW_FRAME: &[u8] = b"{\"type\":\"scored\",\"team\":\"yellow\"}\r\n";

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

        async fn close(&mut self) -> io::Result<()> {
            self.frames
                .send(b"closed".to_vec())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[derive(Debug)]
    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn write_frame(&mut self, _frame: &[u8]) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
        }
    }

    #[derive(Debug)]
    struct StalledSink;

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn write_frame(&mut self, _frame: &[u8]) -> io::Result<()> {
            std::future::pending().await
        }
    }

    fn recording() -> (RecordingSink, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (RecordingSink { frames }, rx)
    }

    fn start_hub(config: HubConfig) -> (BroadcastHub, EventBus) {
        let hub = BroadcastHub::new(config);
        let (bus, events) = EventBus::new(64);
        tokio::spawn(hub.clone().run(events));
        (hub, bus)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
        timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    async fn wait_for_count(hub: &BroadcastHub, count: usize) {
        for _ in 0..100 {
            if hub.subscriber_count() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} subscribers, found {}", count, hub.subscriber_count());
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_exact_frame() {
        let (hub, bus) = start_hub(HubConfig::default());
        let (s1, mut r1) = recording();
        let (s2, mut r2) = recording();
        hub.subscribe(s1).unwrap();
        hub.subscribe(s2).unwrap();

        bus.publish(Event::scored("yellow")).unwrap();

        assert_eq!(next_frame(&mut r1).await.unwrap(), YELLOW_FRAME);
        assert_eq!(next_frame(&mut r2).await.unwrap(), YELLOW_FRAME);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_removed() {
        let (hub, bus) = start_hub(HubConfig::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let failing = hub
            .subscribe(FailingSink {
                attempts: attempts.clone(),
            })
            .unwrap();
        let (healthy, mut rx) = recording();
        let healthy = hub.subscribe(healthy).unwrap();
        assert_eq!(hub.subscriber_count(), 2);

        bus.publish_scored("black").unwrap();
        assert!(next_frame(&mut rx).await.is_some());
        wait_for_count(&hub, 1).await;
        assert!(!hub.is_subscribed(failing));
        assert!(hub.is_subscribed(healthy));

        bus.publish_scored("yellow").unwrap();
        assert_eq!(next_frame(&mut rx).await.unwrap(), YELLOW_FRAME);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_order_is_preserved_per_subscriber() {
        let (hub, bus) = start_hub(HubConfig::default());
        let mut receivers = Vec::new();
        for _ in 0..8 {
            let (sink, rx) = recording();
            hub.subscribe(sink).unwrap();
            receivers.push(rx);
        }

        let teams: Vec<String> = (0..10).map(|i| format!("team-{}", i)).collect();
        for team in &teams {
            bus.publish_scored(team).unwrap();
        }

        for rx in &mut receivers {
            for team in &teams {
                let frame = next_frame(rx).await.unwrap();
                let event: Event = serde_json::from_slice(&frame[..frame.len() - 2]).unwrap();
                assert_eq!(&event.team, team);
            }
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (hub, bus) = start_hub(HubConfig::default());
        let (sink, mut rx) = recording();
        let id = hub.subscribe(sink).unwrap();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.subscriber_count(), 0);

        bus.publish_scored("black").unwrap();
        assert_eq!(next_frame(&mut rx).await.unwrap(), b"closed");
        assert!(next_frame(&mut rx).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_does_not_block_others() {
        let config = HubConfig {
            subscriber_buffer: 4,
            write_timeout: Duration::from_millis(100),
            ..HubConfig::default()
        };
        let (hub, bus) = start_hub(config);
        let stalled = hub.subscribe(StalledSink).unwrap();
        let (sink, mut rx) = recording();
        hub.subscribe(sink).unwrap();

        bus.publish_scored("yellow").unwrap();
        assert_eq!(next_frame(&mut rx).await.unwrap(), YELLOW_FRAME);

        wait_for_count(&hub, 1).await;
        assert!(!hub.is_subscribed(stalled));

        bus.publish_scored("black").unwrap();
        assert!(next_frame(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_subscriber() {
        let hub = BroadcastHub::new(HubConfig {
            subscriber_buffer: 1,
            write_timeout: Duration::from_secs(60),
            ..HubConfig::default()
        });
        let stalled = hub.subscribe(StalledSink).unwrap();
        let frame: Frame = Event::scored("black").to_frame().unwrap().into();

        // The writer holds at most one frame in flight plus one queued
        for _ in 0..4 {
            hub.fan_out(frame.clone());
            tokio::task::yield_now().await;
        }

        assert_eq!(hub.subscriber_count(), 0);
        assert!(!hub.is_subscribed(stalled));
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_stream() {
        let hub = BroadcastHub::new(HubConfig::default());
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (sink, rx) = recording();
            hub.subscribe(sink).unwrap();
            receivers.push(rx);
        }

        assert_eq!(hub.shutdown().await, 3);
        assert_eq!(hub.subscriber_count(), 0);
        for rx in &mut receivers {
            assert_eq!(next_frame(rx).await.unwrap(), b"closed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stalled_writers() {
        let hub = BroadcastHub::new(HubConfig {
            write_timeout: Duration::from_millis(100),
            ..HubConfig::default()
        });
        hub.subscribe(StalledSink).unwrap();
        hub.fan_out(Event::scored("black").to_frame().unwrap().into());
        tokio::task::yield_now().await;

        assert_eq!(hub.shutdown().await, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let hub = BroadcastHub::new(HubConfig {
            max_subscribers: 2,
            ..HubConfig::default()
        });
        let (a, _ra) = recording();
        let (b, _rb) = recording();
        let (c, _rc) = recording();

        let first = hub.subscribe(a).unwrap();
        assert!(hub.subscribe(b).is_ok());
        assert!(hub.subscribe(c).is_err());
        assert_eq!(hub.subscriber_count(), 2);

        hub.unsubscribe(first);
        let (d, _rd) = recording();
        assert!(hub.subscribe(d).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribers_respect_capacity() {
        let hub = BroadcastHub::new(HubConfig {
            max_subscribers: 4,
            ..HubConfig::default()
        });

        let attempts = (0..32).map(|_| {
            let hub = hub.clone();
            tokio::spawn(async move {
                let (sink, _rx) = recording();
                hub.subscribe(sink).is_ok()
            })
        });
        let accepted = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(accepted, 4);
        assert_eq!(hub.subscriber_count(), 4);
    }
}
