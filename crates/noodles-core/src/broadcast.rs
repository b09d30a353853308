//! Fan-out of server messages to subscribed sessions.
//!
//! Every subscriber owns one bounded FIFO queue. The broadcaster only ever
//! uses `try_send`, so a slow client can never stall the publisher or the
//! other subscribers: when a queue is full or its receiver is gone, that
//! subscriber is evicted and its session task sees the queue close.
//!
//! Because every message bound for a session (deltas, signals, and its own
//! invocation replies) travels through the same queue, the order in which
//! the single writer publishes is exactly the order the client observes.

use std::collections::BTreeMap;

use noodles_types::{ServerMessage, SessionId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

/// Errors raised when admitting a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The session's queue could not take its join-time snapshot.
    #[error("subscriber {session} could not accept a {required}-message snapshot")]
    SubscriberLagged {
        /// The rejected session.
        session: SessionId,
        /// Number of messages in the snapshot.
        required: usize,
    },

    /// The session is already subscribed.
    #[error("subscriber {0} is already registered")]
    AlreadySubscribed(SessionId),
}

/// The set of sessions currently eligible to receive messages.
#[derive(Debug, Default)]
pub struct Broadcaster {
    subscribers: BTreeMap<SessionId, Sender<ServerMessage>>,
}

impl Broadcaster {
    /// Create a broadcaster with no subscribers.
    pub const fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
        }
    }

    /// Admit `session`, first queueing `baseline` for it alone.
    ///
    /// The baseline is queued before the session joins the set, so nothing
    /// published afterwards can overtake it.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::SubscriberLagged`] if the queue cannot hold
    /// the whole baseline, or [`BroadcastError::AlreadySubscribed`] if the
    /// session is already a member. A rejected session is not subscribed.
    pub fn subscribe(
        &mut self,
        session: SessionId,
        sender: Sender<ServerMessage>,
        baseline: Vec<ServerMessage>,
    ) -> Result<(), BroadcastError> {
        if self.subscribers.contains_key(&session) {
            return Err(BroadcastError::AlreadySubscribed(session));
        }

        let required = baseline.len();
        if sender.capacity() < required {
            return Err(BroadcastError::SubscriberLagged { session, required });
        }
        for message in baseline {
            sender
                .try_send(message)
                .map_err(|_closed_or_full| BroadcastError::SubscriberLagged { session, required })?;
        }

        self.subscribers.insert(session, sender);
        debug!(%session, snapshot_len = required, subscribers = self.subscribers.len(), "subscriber added");
        Ok(())
    }

    /// Remove `session`. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, session: SessionId) -> bool {
        let removed = self.subscribers.remove(&session).is_some();
        if removed {
            debug!(%session, subscribers = self.subscribers.len(), "subscriber removed");
        }
        removed
    }

    /// Deliver `message` to every subscriber.
    ///
    /// Returns the number of subscribers that accepted it. Subscribers whose
    /// queue is full or closed are evicted.
    pub fn publish(&mut self, message: &ServerMessage) -> usize {
        let mut delivered: usize = 0;
        self.subscribers.retain(|session, sender| {
            let kept = offer(*session, sender, message.clone());
            if kept {
                delivered = delivered.saturating_add(1);
            }
            kept
        });
        delivered
    }

    /// Deliver `message` to one subscriber only.
    ///
    /// Returns whether it was accepted. A subscriber that cannot accept it
    /// is evicted.
    pub fn send_to(&mut self, session: SessionId, message: ServerMessage) -> bool {
        let Some(sender) = self.subscribers.get(&session) else {
            debug!(%session, "dropping direct message for unknown subscriber");
            return false;
        };
        let kept = offer(session, sender, message);
        if !kept {
            self.subscribers.remove(&session);
        }
        kept
    }

    /// Whether `session` is subscribed.
    pub fn contains(&self, session: SessionId) -> bool {
        self.subscribers.contains_key(&session)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Try to enqueue one message; `false` means the subscriber must go.
fn offer(session: SessionId, sender: &Sender<ServerMessage>, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%session, "subscriber queue full, evicting");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%session, "subscriber queue closed, evicting");
            false
        }
    }
}
