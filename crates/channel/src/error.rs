use std::time::Duration;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler is registered under the recipient's name.
    #[error("no handler registered for agent '{recipient}'")]
    UnregisteredRecipient { recipient: String },

    /// A handler returned an error, panicked, or overran its time budget.
    #[error("handler for agent '{agent}' failed: {reason}")]
    HandlerFailure { agent: String, reason: String },

    /// No correlated reply arrived in time.
    #[error("no reply for correlation id '{correlation_id}' within {timeout:?}")]
    RequestTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    /// Another request with the same correlation id is still waiting.
    #[error("a request with correlation id '{correlation_id}' is already in flight")]
    DuplicateRequest { correlation_id: String },

    /// The ingress queue has no free slot (`try_send` only).
    #[error("channel queue is full")]
    QueueFull,

    /// The channel has been shut down.
    #[error("channel is closed")]
    Closed,

    /// Message construction or serialization failed.
    #[error(transparent)]
    Protocol(#[from] courier_protocol::Error),
}

impl Error {
    #[must_use]
    pub fn unregistered(recipient: impl std::fmt::Display) -> Self {
        Self::UnregisteredRecipient {
            recipient: recipient.to_string(),
        }
    }

    #[must_use]
    pub fn handler_failure(agent: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::HandlerFailure {
            agent: agent.to_string(),
            reason: reason.to_string(),
        }
    }
}
