//! In-process agent-to-agent dispatch.
//!
//! Agents register a [`MessageHandler`] under a name; senders hand
//! [`Message`](courier_protocol::Message)s to an [`A2aChannel`], whose
//! dispatch loop drains a bounded queue and invokes the recipient's handler.
//! Replies that carry an awaited correlation id complete the matching
//! [`ChannelHandle::request`] instead.

pub mod channel;
pub mod error;
pub mod handler;
pub mod pending;
pub mod registry;

pub use {
    channel::{
        A2aChannel, ChannelHandle, ChannelStats, Delivery, DropReason, ShutdownMode,
        ShutdownReport,
    },
    error::{Error, Result},
    handler::{HandlerStats, MessageHandler},
    pending::PendingReplies,
    registry::HandlerRegistry,
};
