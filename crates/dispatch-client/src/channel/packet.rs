//! Engine.IO v4 / Socket.IO v5 text framing (websocket transport, default
//! namespace only).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChannelError, ChannelResult};

/// Client → server Socket.IO CONNECT for the default namespace.
pub const CONNECT_FRAME: &str = "40";
/// Client → server Socket.IO DISCONNECT for the default namespace.
pub const DISCONNECT_FRAME: &str = "41";
/// Engine.IO pong, sent in answer to a server ping.
pub const PONG_FRAME: &str = "3";

const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO `open` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        payload: Option<Value>,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace() == DEFAULT_NAMESPACE
    }
}

/// Parse one Engine.IO text frame.
pub fn decode_engine(text: &str) -> ChannelResult<EnginePacket> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChannelError::Protocol("empty engine packet".to_string()))?;
    let body = chars.as_str();

    match kind {
        '0' => {
            let handshake: OpenHandshake = serde_json::from_str(body).map_err(|error| {
                ChannelError::Protocol(format!("invalid open handshake: {}", error))
            })?;
            Ok(EnginePacket::Open(handshake))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(body.to_string())),
        '3' => Ok(EnginePacket::Pong(body.to_string())),
        '4' => Ok(EnginePacket::Message(body.to_string())),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ChannelError::Protocol(format!(
            "unknown engine packet type: {}",
            other
        ))),
    }
}

/// Parse the Socket.IO packet inside an Engine.IO message body.
pub fn decode_socket(text: &str) -> ChannelResult<SocketPacket> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChannelError::Protocol("empty socket packet".to_string()))?;
    if matches!(kind, '5' | '6') {
        return Err(ChannelError::Protocol(
            "binary packets are not supported".to_string(),
        ));
    }
    let mut rest = chars.as_str();

    let mut namespace = DEFAULT_NAMESPACE.to_string();
    if rest.starts_with('/') {
        let (nsp, remainder) = match rest.split_once(',') {
            Some((nsp, remainder)) => (nsp, remainder),
            None => (rest, ""),
        };
        namespace = nsp.to_string();
        rest = remainder;
    }

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|error| ChannelError::Protocol(format!("invalid ack id: {}", error)))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let payload = if rest.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest).map_err(|error| {
            ChannelError::Protocol(format!("invalid socket payload: {}", error))
        })?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace, payload }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut args = match payload {
                Some(Value::Array(args)) => args,
                _ => {
                    return Err(ChannelError::Protocol(
                        "invalid EVENT payload: expected JSON array".to_string(),
                    ));
                }
            };
            if args.is_empty() {
                return Err(ChannelError::Protocol("EVENT without a name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => {
                    return Err(ChannelError::Protocol(
                        "invalid EVENT name: expected string".to_string(),
                    ));
                }
            };
            Ok(SocketPacket::Event {
                namespace,
                ack_id,
                name,
                args,
            })
        }
        '3' => {
            let ack_id = ack_id
                .ok_or_else(|| ChannelError::Protocol("ACK without an id".to_string()))?;
            let args = match payload {
                Some(Value::Array(args)) => args,
                None => Vec::new(),
                Some(_) => {
                    return Err(ChannelError::Protocol(
                        "invalid ACK payload: expected JSON array".to_string(),
                    ));
                }
            };
            Ok(SocketPacket::Ack {
                namespace,
                ack_id,
                args,
            })
        }
        '4' => Ok(SocketPacket::ConnectError { namespace, payload }),
        other => Err(ChannelError::Protocol(format!(
            "unknown socket packet type: {}",
            other
        ))),
    }
}

/// Encode a Socket.IO EVENT on the default namespace as a complete text frame.
pub fn encode_event<T>(name: &str, payload: &T) -> ChannelResult<String>
where
    T: Serialize + ?Sized,
{
    let frame = serde_json::to_string(&(name, payload))?;
    Ok(format!("42{}", frame))
}
