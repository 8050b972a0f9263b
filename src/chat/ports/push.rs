//! Push-style delivery of messages.
//!
//! Socket transports deliver one message per event, with no ordering
//! guarantee across network hops. Events arrive on a bounded channel.

use tokio::sync::mpsc;

use crate::chat::domain::{ConversationId, Message};

/// A message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// The pushed message.
    pub message: Message,
}

/// Receiving end of a push subscription.
pub type MessageFeed = mpsc::Receiver<IncomingMessage>;

/// Port for transports that push messages as they arrive.
pub trait MessagePush: Send + Sync {
    /// Opens a subscription. Events pushed before the call are not replayed.
    fn subscribe(&self) -> MessageFeed;
}
