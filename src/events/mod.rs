//! Event broadcasting for backup lifecycle notifications.
//!
//! Services publish events to the bus; any number of subscribers (the
//! `serve` command's event log, tests, future push channels) receive a copy.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Sweep, backup   │────>│    EventBus     │────>│   Subscribers   │
//! │    service      │     │  (broadcast)    │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if event.topic().matches(&EventTopic::Backups) { ... }
//! }
//! ```

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{BackupGroup, KeepStatus};

/// Default channel capacity for the event bus.
/// This determines how many events can be buffered before slow receivers
/// start missing events (lagging).
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// Catalog changes: backups added, removed, keep status changed
    Backups,
    /// Retention sweep runs
    Sweep,
    /// All events (wildcard subscription)
    All,
}

impl EventTopic {
    /// Check if this topic matches another topic.
    /// `All` matches everything, otherwise exact match is required.
    pub fn matches(&self, other: &EventTopic) -> bool {
        matches!(self, EventTopic::All) || matches!(other, EventTopic::All) || self == other
    }
}

/// Backup lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A backup was removed from one location and from the catalog.
    BackupRemoved {
        db_id: String,
        backup_id: String,
        location_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A backup was recorded in the catalog.
    BackupAdded {
        db_id: String,
        group: BackupGroup,
        timestamp: DateTime<Utc>,
    },

    /// The operator hold on a backup changed.
    KeepStatusChanged {
        db_id: String,
        backup_id: String,
        statuses: BTreeMap<String, KeepStatus>,
        timestamp: DateTime<Utc>,
    },

    /// A retention sweep finished.
    SweepCompleted {
        timestamp: DateTime<Utc>,
        dry_run: bool,
        databases: usize,
        candidates: usize,
        deleted: usize,
        failed_deletes: usize,
        failed_databases: usize,
    },
}

impl ServerEvent {
    /// Get the topic for this event.
    pub fn topic(&self) -> EventTopic {
        match self {
            ServerEvent::BackupRemoved { .. }
            | ServerEvent::BackupAdded { .. }
            | ServerEvent::KeepStatusChanged { .. } => EventTopic::Backups,
            ServerEvent::SweepCompleted { .. } => EventTopic::Sweep,
        }
    }

    /// Get the event type name as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::BackupRemoved { .. } => "backup_removed",
            ServerEvent::BackupAdded { .. } => "backup_added",
            ServerEvent::KeepStatusChanged { .. } => "keep_status_changed",
            ServerEvent::SweepCompleted { .. } => "sweep_completed",
        }
    }
}

/// Central event bus for broadcasting events.
///
/// Uses a tokio broadcast channel to allow multiple subscribers to receive
/// the same events. Events are cloned for each subscriber.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
    /// Counter for total events published
    events_published: AtomicU64,
    /// Counter for events dropped due to no subscribers
    events_dropped: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// If there are no subscribers, the event is dropped and 0 is returned.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Subscribe to events from this bus.
    ///
    /// If the receiver falls behind, it will receive `RecvError::Lagged`
    /// indicating how many events were missed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Get the number of events dropped (no subscribers).
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        // Clone shares the same underlying broadcast channel
        Self {
            sender: self.sender.clone(),
            events_published: AtomicU64::new(self.events_published.load(Ordering::Relaxed)),
            events_dropped: AtomicU64::new(self.events_dropped.load(Ordering::Relaxed)),
        }
    }
}
