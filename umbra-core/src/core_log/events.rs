//! Typed event stream exposed by every replicated log
//!
//! Logs publish on a tokio broadcast channel. Consumers that fall behind
//! receive `RecvError::Lagged` and are expected to recompute from the
//! log's current state rather than replay what they missed.

use super::entry::LogEntry;
use tokio::sync::broadcast;

/// Default number of buffered events per log
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events emitted by a replicated log
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A local append
    Write(LogEntry),

    /// One entry fetched from a peer during catch-up or live replication
    ReplicateProgress {
        entry: LogEntry,
        have: usize,
        max: usize,
    },

    /// A batch of remote entries (or an imported snapshot) was merged
    Replicated { count: usize },

    /// Load completed
    Ready,
}

impl LogEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LogEvent::Write(_) => "write",
            LogEvent::ReplicateProgress { .. } => "replicate.progress",
            LogEvent::Replicated { .. } => "replicated",
            LogEvent::Ready => "ready",
        }
    }
}

/// Broadcaster for log events
#[derive(Clone)]
pub struct LogEvents {
    tx: broadcast::Sender<LogEvent>,
}

impl LogEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of receivers that got the event
    pub fn emit(&self, event: LogEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LogEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let events = LogEvents::new(4);
        assert_eq!(events.emit(LogEvent::Ready), 0);
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let events = LogEvents::new(4);
        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        assert_eq!(events.emit(LogEvent::Replicated { count: 3 }), 1);
        match rx.recv().await.unwrap() {
            LogEvent::Replicated { count } => assert_eq!(count, 3),
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let events = LogEvents::new(2);
        let mut rx = events.subscribe();
        for _ in 0..5 {
            events.emit(LogEvent::Ready);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
