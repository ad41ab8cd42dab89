//! Driver-to-dispatcher chat session client.
//!
//! A session resolves the driver's identity from the host platform, verifies
//! it with the backend, hydrates prior conversation history, and then holds a
//! live Socket.IO channel open for real-time replies.

pub mod attention;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod session;
pub mod timeline;
pub mod verification;

pub use attention::{ActiveView, AttentionRouter};
pub use backend::{Backend, HistoryRecord, HistoryReply, HttpBackend};
pub use channel::{
    ChannelConfig, ChannelEvent, ChannelState, LiveChannel, OutboundEvent, ReconnectPolicy,
    ReplyPayload, SocketIoChannel,
};
pub use config::ClientConfig;
pub use error::{
    BackendError, ChannelError, ConfigError, IdentityError, SendError, SessionError,
    VerificationError,
};
pub use identity::{AlertSink, HostPlatform, HostUser, Identifier, InitDataHost, StaticHost};
pub use session::{DispatchSession, SessionPhase, SessionUpdate, TeardownToken};
pub use timeline::{Message, MessageOrigin, Sender, Timeline};
pub use verification::Authorized;
