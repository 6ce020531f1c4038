//! Consumer-facing notifications and queue snapshots.

use serde::Serialize;

/// Notification emitted on the engine's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// The recommendation fetch failed; the consumer decides whether to retry
    RefillFailed { reason: String },
    /// Nothing displayable and nothing in flight
    QueueStarved,
    /// New books were appended to the ready queue
    ItemsAvailable { count: usize },
}

/// What the consumer should show right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// A book is current
    Ready,
    /// Nothing current yet but a refill is still working (show a spinner)
    Loading,
    /// Nothing current and nothing in flight (show a retry button)
    Starved,
    /// The engine has been shut down
    Closed,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub generation: u64,
    pub cursor: usize,
    pub len: usize,
    /// Admitted books not yet released to the ready queue
    pub pending: usize,
    /// A recommendation fetch is running
    pub fetching: bool,
    pub closed: bool,
}

impl QueueSnapshot {
    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.cursor)
    }

    /// A refill is active: fetching, or still illustrating admitted books
    pub fn is_busy(&self) -> bool {
        self.fetching || self.pending > 0
    }

    pub fn status(&self) -> QueueStatus {
        if self.closed {
            QueueStatus::Closed
        } else if self.remaining() > 0 {
            QueueStatus::Ready
        } else if self.is_busy() {
            QueueStatus::Loading
        } else {
            QueueStatus::Starved
        }
    }
}

/// Result of asking for a refill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillRequest {
    /// A new refill was started
    Started,
    /// A refill was already active; nothing new was started
    Coalesced,
    /// The engine has been shut down
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cursor: usize, len: usize, pending: usize, fetching: bool) -> QueueSnapshot {
        QueueSnapshot {
            generation: 0,
            cursor,
            len,
            pending,
            fetching,
            closed: false,
        }
    }

    #[test]
    fn test_status_distinguishes_loading_from_starved() {
        assert_eq!(snapshot(0, 1, 0, false).status(), QueueStatus::Ready);
        assert_eq!(snapshot(1, 1, 2, false).status(), QueueStatus::Loading);
        assert_eq!(snapshot(1, 1, 0, true).status(), QueueStatus::Loading);
        assert_eq!(snapshot(1, 1, 0, false).status(), QueueStatus::Starved);

        let closed = QueueSnapshot {
            closed: true,
            ..snapshot(0, 3, 0, false)
        };
        assert_eq!(closed.status(), QueueStatus::Closed);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(QueueEvent::ItemsAvailable { count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "items_available", "count": 3}));

        let json = serde_json::to_value(QueueEvent::QueueStarved).unwrap();
        assert_eq!(json, serde_json::json!({"event": "queue_starved"}));
    }
}
