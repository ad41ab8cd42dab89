//! Live channel: the persistent bidirectional connection to the backend.
//!
//! - `packet`: Engine.IO / Socket.IO text framing
//! - `backoff`: reconnect schedule
//! - `manager`: the websocket-backed `LiveChannel`

pub mod backoff;
pub mod manager;
pub mod packet;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::ChannelResult;
use crate::identity::Identifier;

pub use backoff::ReconnectPolicy;
pub use manager::{ChannelConfig, SocketIoChannel};

pub const EVENT_REGISTER: &str = "socket register";
pub const EVENT_CHAT_MESSAGE: &str = "chat message";
pub const EVENT_REPLY: &str = "reply";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Registered,
    Disconnected,
    Closed,
}

/// Events emitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Register { username: String },
    ChatMessage { user_id: String, content: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => EVENT_REGISTER,
            Self::ChatMessage { .. } => EVENT_CHAT_MESSAGE,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Register { username } => json!({ "username": username }),
            Self::ChatMessage { user_id, content } => {
                json!({ "userId": user_id, "content": content })
            }
        }
    }
}

/// Inbound `reply` payload.
///
/// `messageId` is informational only. Any shape that is not an integral
/// number (or a string holding one) decodes to `None` so the reply itself
/// is never lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(
        rename = "messageId",
        default,
        deserialize_with = "lenient_message_id"
    )]
    pub message_id: Option<i64>,
    pub reply: String,
}

fn lenient_message_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(number)) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && value.fract() == 0.0)
                .filter(|value| *value >= i64::MIN as f64 && *value <= i64::MAX as f64)
                .map(|value| value as i64)
        }),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// Events delivered from the channel to its single consumer, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connected and `socket register` emitted.
    Connected { sid: Option<String> },
    Reply(ReplyPayload),
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectExhausted { attempts: u32 },
}

/// Live channel contract used by the session.
///
/// Implementations own the connection exclusively.
#[async_trait]
pub trait LiveChannel: Send {
    /// Start connecting. Each successful (re)connection emits
    /// `socket register { username }` before anything else.
    async fn open(&mut self, identifier: &Identifier) -> ChannelResult<()>;

    /// Best-effort emit. Never blocks and never reports delivery.
    fn send(&self, event: OutboundEvent);

    /// Next inbound event; `None` once the channel is closed or was never opened.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);

    fn state(&self) -> ChannelState;
}
