//! Notification Channel
//!
//! Best-effort delivery of status payloads to whichever client is
//! subscribed to the status characteristic. Owned by the event loop.

use crate::domain::errors::DeliveryError;
use crate::domain::models::{ClientHandle, SubscriptionState};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Platform notify primitive for one subscribed client.
///
/// `deliver` must not block beyond a bounded enqueue.
pub trait NotifySink: Send + fmt::Debug {
    fn deliver(&mut self, payload: Vec<u8>) -> Result<(), DeliveryError>;
}

/// Payloads a notify session may have pending before new ones are dropped.
pub const NOTIFY_QUEUE_DEPTH: usize = 32;

/// Bounded FIFO hand-off to a notify session task.
#[derive(Debug)]
pub struct QueueSink {
    queue: mpsc::Sender<Vec<u8>>,
}

/// Create a sink together with the receiving end a notify session drains.
pub fn notify_queue() -> (QueueSink, mpsc::Receiver<Vec<u8>>) {
    let (queue, rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
    (QueueSink { queue }, rx)
}

impl NotifySink for QueueSink {
    fn deliver(&mut self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        self.queue.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::ClientGone,
        })
    }
}

pub struct NotificationChannel {
    state: SubscriptionState,
    sink: Option<Box<dyn NotifySink>>,
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self {
            state: SubscriptionState::default(),
            sink: None,
        }
    }

    pub fn subscription(&self) -> SubscriptionState {
        self.state
    }

    /// A client started a notify session. Replaces any previous session.
    pub fn subscribe(&mut self, client: ClientHandle, sink: Box<dyn NotifySink>) {
        if let Some(previous) = self.state.client {
            debug!("Client {:?} replaces notify session {:?}", client, previous);
        }
        info!("Client {:?} subscribed to status notifications", client);
        self.state = SubscriptionState {
            subscribed: true,
            client: Some(client),
        };
        self.sink = Some(sink);
    }

    /// A notify session ended. Returns false for a stale handle.
    pub fn unsubscribe(&mut self, client: ClientHandle) -> bool {
        if self.state.client != Some(client) {
            debug!("Ignoring unsubscribe from stale session {:?}", client);
            return false;
        }
        info!("Client {:?} unsubscribed from status notifications", client);
        self.clear();
        true
    }

    /// Hand a payload to the subscribed client. Returns whether it was
    /// handed off; without a subscriber the payload is dropped.
    pub fn publish(&mut self, payload: Vec<u8>) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            debug!(
                "No subscriber, dropping {} byte notification",
                payload.len()
            );
            return false;
        };

        let len = payload.len();
        match sink.deliver(payload) {
            Ok(()) => {
                debug!("Queued {} byte notification", len);
                true
            }
            Err(DeliveryError::Backlogged) => {
                warn!(
                    "Notify queue of {:?} is full, dropping {} byte notification",
                    self.state.client, len
                );
                false
            }
            Err(e) => {
                warn!(
                    "Notification to {:?} failed: {}, marking unsubscribed",
                    self.state.client, e
                );
                self.clear();
                false
            }
        }
    }

    fn clear(&mut self) {
        self.state = SubscriptionState::default();
        self.sink = None;
    }
}
