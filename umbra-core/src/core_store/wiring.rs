//! Log event to notification wiring
//!
//! Each store gets one listener task reading its log's event stream. A
//! single task per store serializes handler execution for that store.
//! Attachment happens at most once per store instance; pausing only stops
//! forwarding, the task keeps draining events.

use crate::core_log::{LogEntry, LogEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Named callbacks a store registers on its log
#[async_trait]
pub trait StoreListener: Send + Sync + 'static {
    /// Store name used in log lines
    fn store(&self) -> &str;

    /// A local append: emit only the new entry
    async fn on_write(&self, entry: LogEntry);

    async fn on_replicate_progress(&self, entry: LogEntry, have: usize, max: usize) {
        trace!(store = %self.store(), hash = %entry.hash, have, max, "Replication progress");
    }

    /// Remote entries merged: emit the full recomputed projection
    async fn on_replicated(&self);

    async fn on_ready(&self) {
        self.on_replicated().await;
    }
}

/// Per-store listener attachment state
pub struct Attachment {
    attached: AtomicBool,
    forwarding: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Attachment {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
            forwarding: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(None),
        }
    }

    /// Start forwarding `events` to `listener`. Returns false, and does
    /// nothing, if a listener was attached before.
    pub fn attach(
        &self,
        listener: Arc<dyn StoreListener>,
        events: broadcast::Receiver<LogEvent>,
    ) -> bool {
        if self
            .attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.forwarding.store(true, Ordering::SeqCst);
        let handle = spawn_listener(listener, events, self.forwarding.clone());
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn is_forwarding(&self) -> bool {
        self.is_attached() && self.forwarding.load(Ordering::SeqCst)
    }

    /// Stop forwarding without detaching. Returns whether anything changed.
    pub fn pause(&self) -> bool {
        self.is_attached() && self.forwarding.swap(false, Ordering::SeqCst)
    }

    pub fn resume(&self) {
        self.forwarding.store(true, Ordering::SeqCst);
    }

    /// Stop the listener task for good
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl Default for Attachment {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the task draining `events` into `listener`
pub fn spawn_listener(
    listener: Arc<dyn StoreListener>,
    mut events: broadcast::Receiver<LogEvent>,
    forwarding: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    // the projection is a pure function of log state
                    warn!(store = %listener.store(), skipped, "Listener lagged, recomputing");
                    if forwarding.load(Ordering::SeqCst) {
                        listener.on_replicated().await;
                    }
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !forwarding.load(Ordering::SeqCst) {
                continue;
            }
            debug!(store = %listener.store(), event = event.name(), "Dispatching log event");
            match event {
                LogEvent::Write(entry) => listener.on_write(entry).await,
                LogEvent::ReplicateProgress { entry, have, max } => {
                    listener.on_replicate_progress(entry, have, max).await
                }
                LogEvent::Replicated { .. } => listener.on_replicated().await,
                LogEvent::Ready => listener.on_ready().await,
            }
        }
        debug!(store = %listener.store(), "Listener stopped");
    })
}
