//! Event bus (§6).
//!
//! A scan publishes progress as it runs; the CLI's `watch` dashboard and
//! any other subscriber (tests, a future web UI) drain it independently.
//! Each subscriber gets its own bounded queue so one slow reader can't
//! apply backpressure to the scan itself — an overflowing queue drops the
//! oldest event rather than blocking the publisher (§6 invariant).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::scan::LogLevel;

/// Per-subscriber queue depth before the oldest event is dropped (§6).
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLogEvent {
    pub scan_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub scan_id: String,
    pub mac: String,
    pub ip: String,
    pub accessible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyEvent {
    pub scan_id: String,
    pub device_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub scan_id: String,
    pub status: String,
}

/// The union of everything a subscriber might receive (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    Log(ScanLogEvent),
    Device(DeviceEvent),
    Topology(TopologyEvent),
    Status(StatusEvent),
}

struct Subscriber {
    queue: Mutex<VecDeque<EventKind>>,
}

/// A process-wide, multi-producer multi-consumer event bus keyed by
/// nothing in particular — every subscriber receives every event and
/// filters by `scan_id` itself, since a typical session only ever watches
/// one scan at a time and the filtering cost is negligible.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<DashMap<u64, Arc<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

/// A handle returned by `subscribe`; dropping it deregisters the
/// subscriber so the bus doesn't grow unbounded across short-lived
/// `watch` sessions.
pub struct Subscription {
    bus: EventBus,
    id: u64,
    subscriber: Arc<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_DEPTH)),
        });
        self.subscribers.insert(id, subscriber.clone());
        Subscription {
            bus: self.clone(),
            id,
            subscriber,
        }
    }

    pub fn publish(&self, event: EventKind) {
        for entry in self.subscribers.iter() {
            let mut queue = entry.value().queue.lock();
            if queue.len() >= SUBSCRIBER_QUEUE_DEPTH {
                queue.pop_front();
            }
            queue.push_back(event.clone());
        }
    }

    pub fn log(&self, scan_id: &str, level: LogLevel, message: impl Into<String>) {
        self.publish(EventKind::Log(ScanLogEvent {
            scan_id: scan_id.to_string(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    /// Drains every event queued since the last call, oldest first.
    pub fn drain(&self) -> Vec<EventKind> {
        let mut queue = self.subscriber.queue.lock();
        queue.drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_published_event() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.log("scan-1", LogLevel::Info, "hello");
        let drained = sub.drain();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 10) {
            bus.log("scan-1", LogLevel::Info, format!("event-{i}"));
        }
        let drained = sub.drain();
        assert_eq!(drained.len(), SUBSCRIBER_QUEUE_DEPTH);
        if let EventKind::Log(first) = &drained[0] {
            assert_eq!(first.message, "event-10");
        } else {
            panic!("expected a log event");
        }
    }

    #[test]
    fn test_dropped_subscription_deregisters() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.subscribers.len(), 1);
        }
        assert_eq!(bus.subscribers.len(), 0);
    }
}
