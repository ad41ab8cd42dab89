//! The single ordered, append-only store of conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Driver,
    Dispatcher,
}

/// Where a message (and therefore its timestamp) came from.
///
/// `History` timestamps are server-assigned; `Outbound` and `Live` timestamps
/// are taken from the local clock at send/arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    History,
    Outbound,
    Live,
}

/// One conversation message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    text: String,
    timestamp: DateTime<Utc>,
    sender: Sender,
    origin: MessageOrigin,
}

impl Message {
    #[must_use]
    pub fn new(
        sender: Sender,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        origin: MessageOrigin,
    ) -> Self {
        Self {
            text: text.into(),
            timestamp,
            sender,
            origin,
        }
    }

    /// Driver message composed locally, stamped now.
    #[must_use]
    pub fn outbound(text: impl Into<String>) -> Self {
        Self::new(Sender::Driver, text, Utc::now(), MessageOrigin::Outbound)
    }

    /// Dispatcher message received on the live channel, stamped at arrival.
    #[must_use]
    pub fn live_reply(text: impl Into<String>) -> Self {
        Self::new(Sender::Dispatcher, text, Utc::now(), MessageOrigin::Live)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }
}

/// Append-only message sequence.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    hydrated: bool,
}

impl Timeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message. Never fails.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// One-time bulk population from history. Returns `false` and leaves the
    /// timeline untouched if it was already hydrated.
    pub fn hydrate(&mut self, messages: impl IntoIterator<Item = Message>) -> bool {
        if self.hydrated {
            warn!("timeline already hydrated; ignoring second hydration");
            return false;
        }
        self.hydrated = true;
        self.messages.extend(messages);
        true
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Every appended message exactly once, in append order.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
