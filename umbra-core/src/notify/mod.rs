//! Outbound pushes to the front layer
//!
//! Everything the node tells its consumers goes through a
//! [`NotificationSink`]. Pushes are fire-and-forget and may repeat;
//! consumers dedupe by message id.

use crate::config::NotificationConfig;
use crate::core_store::model::{
    ChannelMessage, ChannelRecord, DirectMessage, DirectMessageUser,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

/// A push to the front layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum Notification {
    ChannelListUpdated {
        channels: Vec<ChannelRecord>,
    },
    MessageWritten {
        address: String,
        message: ChannelMessage,
    },
    MessageList {
        address: String,
        messages: Vec<ChannelMessage>,
    },
    /// Hint that the consumer may be missing entries and should ask for them
    IdList {
        address: String,
        ids: Vec<String>,
    },
    CertificateListUpdated {
        certificates: Vec<String>,
    },
    /// Conversation address to encrypted phrase
    ConversationListUpdated {
        conversations: BTreeMap<String, String>,
    },
    DirectMessageUsersUpdated {
        users: Vec<DirectMessageUser>,
    },
    DirectMessageWritten {
        address: String,
        message: DirectMessage,
    },
    DirectMessageList {
        address: String,
        messages: Vec<DirectMessage>,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::ChannelListUpdated { .. } => "channelListUpdated",
            Notification::MessageWritten { .. } => "messageWritten",
            Notification::MessageList { .. } => "messageList",
            Notification::IdList { .. } => "idList",
            Notification::CertificateListUpdated { .. } => "certificateListUpdated",
            Notification::ConversationListUpdated { .. } => "conversationListUpdated",
            Notification::DirectMessageUsersUpdated { .. } => "directMessageUsersUpdated",
            Notification::DirectMessageWritten { .. } => "directMessageWritten",
            Notification::DirectMessageList { .. } => "directMessageList",
        }
    }
}

/// Push channel to the front layer
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

enum Sender {
    Bounded(mpsc::Sender<Notification>),
    Unbounded(mpsc::UnboundedSender<Notification>),
}

/// Sink forwarding into a tokio channel read by the transport task
pub struct ChannelSink {
    tx: Sender,
}

impl ChannelSink {
    /// `capacity == 0` gives an unbounded channel
    pub fn new(capacity: usize) -> (Self, NotificationReceiver) {
        if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx: Sender::Unbounded(tx) }, NotificationReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (Self { tx: Sender::Bounded(tx) }, NotificationReceiver::Bounded(rx))
        }
    }

    pub fn from_config(config: &NotificationConfig) -> (Self, NotificationReceiver) {
        Self::new(config.channel_capacity)
    }
}

fn delivered() {
    ::metrics::counter!(crate::metrics::NOTIFICATIONS_EMITTED).increment(1);
}

/// Wait for room in a full bounded channel on a separate task
fn send_when_room(tx: &mpsc::Sender<Notification>, notification: Notification) {
    let name = notification.name();
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(event = name, "Dropped notification: channel full outside a runtime");
        return;
    };
    let tx = tx.clone();
    handle.spawn(async move {
        match tx.send(notification).await {
            Ok(()) => delivered(),
            Err(_) => warn!(event = name, "Dropped notification: receiver gone"),
        }
    });
}

impl NotificationSink for ChannelSink {
    /// A full bounded channel does not drop the push: it waits for room,
    /// so it may arrive after later pushes.
    fn emit(&self, notification: Notification) {
        let name = notification.name();
        let sent = match &self.tx {
            Sender::Unbounded(tx) => tx.send(notification).map_err(|_| ()),
            Sender::Bounded(tx) => match tx.try_send(notification) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(notification)) => return send_when_room(tx, notification),
                Err(TrySendError::Closed(_)) => Err(()),
            },
        };
        match sent {
            Ok(()) => delivered(),
            Err(()) => warn!(event = name, "Dropped notification: receiver gone"),
        }
    }
}

/// Receiving half of a [`ChannelSink`]
pub enum NotificationReceiver {
    Bounded(mpsc::Receiver<Notification>),
    Unbounded(mpsc::UnboundedReceiver<Notification>),
}

impl NotificationReceiver {
    pub async fn recv(&mut self) -> Option<Notification> {
        match self {
            NotificationReceiver::Bounded(rx) => rx.recv().await,
            NotificationReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Sink that records every push, with async waiting for tests and tools
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Notification>>,
    notify: Notify,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.all().iter().filter(|n| n.name() == name).count()
    }

    fn find<F>(&self, pred: &mut F) -> Option<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| pred(n))
            .cloned()
    }

    /// Wait until a recorded push matches `pred`
    pub async fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if let Some(found) = self.find(&mut pred) {
                    return found;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }
}

impl NotificationSink for MemorySink {
    fn emit(&self, notification: Notification) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        self.notify.notify_waiters();
    }
}
