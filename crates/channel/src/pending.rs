use std::{collections::HashMap, sync::Mutex};

use {
    courier_protocol::{AgentName, CorrelationId, Message},
    tokio::sync::oneshot,
    tracing::debug,
};

use crate::error::{Error, Result};

struct PendingReply {
    requester: AgentName,
    reply_kind: String,
    tx: oneshot::Sender<Message>,
}

impl PendingReply {
    fn matches(&self, message: &Message) -> bool {
        &self.requester == message.recipient() && message.is_kind(&self.reply_kind)
    }
}

/// Requests waiting for a correlated reply.
///
/// A reply matches when its correlation id is pending, it is addressed to the
/// agent that issued the request, and it has the kind the request expects.
/// Anything else sharing the id (acks, progress notes) is left for normal
/// dispatch.
#[derive(Default)]
pub struct PendingReplies {
    pending: Mutex<HashMap<CorrelationId, PendingReply>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for a `reply_kind` message to `requester` carrying `id`.
    pub fn register(
        &self,
        id: CorrelationId,
        requester: AgentName,
        reply_kind: impl Into<String>,
    ) -> Result<oneshot::Receiver<Message>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(&id) {
            return Err(Error::DuplicateRequest {
                correlation_id: id.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, PendingReply {
            requester,
            reply_kind: reply_kind.into(),
            tx,
        });
        Ok(rx)
    }

    /// Whether `message` would complete a pending request.
    pub fn awaits(&self, message: &Message) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(message.correlation_id())
            .is_some_and(|p| p.matches(message))
    }

    /// Hand `message` to the request waiting on it.
    ///
    /// Returns the message back when no request takes it: nothing matches,
    /// or the requester stopped waiting between timing out and cancelling.
    /// The caller dispatches it like any other message.
    pub fn resolve(&self, message: Message) -> Option<Message> {
        let waiter = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(message.correlation_id()) {
                Some(p) if p.matches(&message) => pending.remove(message.correlation_id()),
                _ => None,
            }
        };
        let Some(waiter) = waiter else {
            return Some(message);
        };
        match waiter.tx.send(message) {
            Ok(()) => None,
            Err(message) => {
                debug!(
                    correlation_id = %message.correlation_id(),
                    "requester gone before reply arrived"
                );
                Some(message)
            },
        }
    }

    /// Stop waiting on `id`. Returns `true` if it was pending.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
