// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Event bus - the single ordered queue between detectors and the broadcast hub

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Terminates every serialized event on the wire
pub const FRAME_DELIMITER: &[u8] = b"\r\n";

/// Event types in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Scored,
}

/// Application event, serialized as `{"type": ..., "team": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Source of the event, e.g. the gate that scored
    pub team: String,
}

impl Event {
    pub fn scored(team: &str) -> Self {
        Self {
            event_type: EventType::Scored,
            team: team.to_string(),
        }
    }

    /// One self-delimited wire frame: the JSON object followed by CRLF
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(FRAME_DELIMITER);
        Ok(frame)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event queue is full, dropped {0:?}")]
    QueueFull(Event),

    #[error("Event queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Publishing side of the event queue.
///
/// The queue is bounded. When it is full the newest event is dropped and
/// reported, so publishers never block.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    counters: Arc<Counters>,
}

/// Draining side of the event queue, consumed by exactly one serializer
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Self {
            tx,
            counters: Arc::new(Counters::default()),
        };
        (bus, EventStream { rx })
    }

    pub fn publish(&self, event: Event) -> Result<(), PublishError> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PublishError::QueueFull(event))
            }
            Err(TrySendError::Closed(_)) => Err(PublishError::Closed),
        }
    }

    pub fn publish_scored(&self, team: &str) -> Result<(), PublishError> {
        self.publish(Event::scored(team))
    }

    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl EventStream {
    /// Next event in publish order, `None` once every publisher is gone
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_format() {
        let frame = Event::scored("black").to_frame().unwrap();
        assert_eq!(frame, b"{\"type\":\"scored\",\"team\":\"black\"}\r\n");
    }

    #[test]
    fn test_event_parses_from_wire() {
        let event: Event = serde_json::from_str(r#"{"type":"scored","team":"yellow"}"#).unwrap();
        assert_eq!(event, Event::scored("yellow"));

        assert!(serde_json::from_str::<Event>(r#"{"type":"fouled","team":"yellow"}"#).is_err());
    }

    #[tokio::test]
    async fn test_publish_order_is_preserved() {
        let (bus, mut stream) = EventBus::new(8);

        for team in ["black", "yellow", "black"] {
            bus.publish_scored(team).unwrap();
        }

        assert_eq!(stream.next().await.unwrap().team, "black");
        assert_eq!(stream.next().await.unwrap().team, "yellow");
        assert_eq!(stream.next().await.unwrap().team, "black");
        assert_eq!(bus.published(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (bus, mut stream) = EventBus::new(2);

        bus.publish_scored("black").unwrap();
        bus.publish_scored("yellow").unwrap();
        assert_eq!(
            bus.publish_scored("black"),
            Err(PublishError::QueueFull(Event::scored("black")))
        );
        assert_eq!(bus.dropped(), 1);

        assert_eq!(stream.next().await.unwrap().team, "black");
        assert_eq!(stream.next().await.unwrap().team, "yellow");
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (bus, stream) = EventBus::new(2);
        drop(stream);

        assert_eq!(bus.publish_scored("black"), Err(PublishError::Closed));
    }

    #[tokio::test]
    async fn test_stream_ends_with_publishers() {
        let (bus, mut stream) = EventBus::new(2);
        bus.publish_scored("yellow").unwrap();
        drop(bus);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
