//! Session orchestration: resolve, verify, hydrate, then go live.
//!
//! A `DispatchSession` is driven from a single task. `start()` runs the
//! pipeline as one linear `Result` chain; afterwards the owner alternates
//! between `send()` for user input and `next_update()` for channel traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::attention::{ActiveView, AttentionRouter};
use crate::backend::Backend;
use crate::channel::{ChannelEvent, ChannelState, LiveChannel, OutboundEvent};
use crate::error::{IdentityError, SendError, SessionError};
use crate::history;
use crate::identity::{self, HostPlatform, Identifier};
use crate::timeline::{Message, Timeline};
use crate::verification;

/// Lifecycle of one mounted conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Resolving,
    Verifying,
    Hydrating,
    Connecting,
    Live,
    /// A fatal identity or verification failure ended the session.
    Terminated,
    /// The owner tore the session down.
    TornDown,
}

impl SessionPhase {
    /// Whether the startup pipeline is still in flight.
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::Verifying | Self::Hydrating | Self::Connecting
        )
    }
}

/// Shared teardown flag, checked after every suspension point of `start()`.
#[derive(Debug, Clone, Default)]
pub struct TeardownToken(Arc<AtomicBool>);

impl TeardownToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_torn_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What `next_update()` applied to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A dispatcher reply was appended to the timeline.
    MessageAppended { view_changed: bool },
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    ReconnectExhausted { attempts: u32 },
}

/// One driver conversation bound to a backend and a live channel.
pub struct DispatchSession<B, C>
where
    B: Backend,
    C: LiveChannel,
{
    host: Option<Arc<dyn HostPlatform>>,
    backend: B,
    channel: C,
    token: TeardownToken,
    user_id: Option<Identifier>,
    timeline: Timeline,
    attention: AttentionRouter,
    phase: SessionPhase,
    channel_released: bool,
}

impl<B, C> DispatchSession<B, C>
where
    B: Backend,
    C: LiveChannel,
{
    pub fn new(host: Option<Arc<dyn HostPlatform>>, backend: B, channel: C) -> Self {
        Self {
            host,
            backend,
            channel,
            token: TeardownToken::new(),
            user_id: None,
            timeline: Timeline::new(),
            attention: AttentionRouter::new(),
            phase: SessionPhase::Idle,
            channel_released: false,
        }
    }

    /// Run resolve, verify, hydrate and open. A fatal failure alerts through
    /// the host (where one exists) and skips every later phase.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.token.is_torn_down() {
            return Err(SessionError::TornDown);
        }
        if self.phase != SessionPhase::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        self.phase = SessionPhase::Resolving;
        let host = self.host.clone();
        let identifier = match identity::resolve(host.as_deref()) {
            Ok(identifier) => identifier,
            Err(err) => return Err(self.terminate(err.into())),
        };
        let Some(host) = host else {
            return Err(self.terminate(IdentityError::HostUnavailable.into()));
        };
        self.user_id = Some(identifier.clone());
        info!(user_id = %identifier, "driver identity resolved");

        self.phase = SessionPhase::Verifying;
        let verified =
            verification::verify_or_close(&self.backend, host.as_ref(), &identifier).await;
        self.ensure_live().await?;
        if let Err(err) = verified {
            return Err(self.terminate(err.into()));
        }

        self.phase = SessionPhase::Hydrating;
        let messages = history::fetch(&self.backend, &identifier).await;
        self.ensure_live().await?;
        self.timeline.hydrate(messages);

        self.phase = SessionPhase::Connecting;
        let opened = self.channel.open(&identifier).await;
        self.ensure_live().await?;
        if let Err(err) = opened {
            error!(user_id = %identifier, "failed to open live channel: {}", err);
            return Err(self.terminate(err.into()));
        }

        self.phase = SessionPhase::Live;
        info!(
            user_id = %identifier,
            history = self.timeline.len(),
            "session live"
        );
        Ok(())
    }

    /// Append a driver message and emit it once on the live channel.
    ///
    /// Validation failures append nothing and emit nothing. Delivery is never
    /// confirmed.
    pub fn send(&mut self, text: &str) -> Result<(), SendError> {
        if self.is_torn_down() {
            return Err(SendError::TornDown);
        }
        let content = text.trim();
        if content.is_empty() {
            debug!("rejecting empty outbound message");
            return Err(SendError::EmptyMessage);
        }
        let user_id = match (&self.user_id, self.phase) {
            (_, SessionPhase::Terminated) | (None, _) => {
                warn!("rejecting outbound message; no verified driver");
                return Err(SendError::NotReady);
            }
            (Some(user_id), _) => user_id.as_str().to_string(),
        };

        self.timeline.append(Message::outbound(content));
        self.attention.route_on_send();
        self.channel.send(OutboundEvent::ChatMessage {
            user_id,
            content: content.to_string(),
        });
        Ok(())
    }

    /// Await one channel event and apply it fully. `None` after teardown or
    /// once the channel has nothing more to deliver.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        if self.is_torn_down() {
            return None;
        }
        let event = self.channel.next_event().await?;
        if self.is_torn_down() {
            debug!("discarding channel event received after teardown");
            return None;
        }
        Some(self.apply(event))
    }

    fn apply(&mut self, event: ChannelEvent) -> SessionUpdate {
        match event {
            ChannelEvent::Reply(payload) => {
                debug!(message_id = ?payload.message_id, "dispatcher reply received");
                self.timeline.append(Message::live_reply(payload.reply));
                let view_changed = self.attention.route_on_receive();
                SessionUpdate::MessageAppended { view_changed }
            }
            ChannelEvent::Connected { .. } => SessionUpdate::Connected,
            ChannelEvent::Disconnected { reason } => SessionUpdate::Disconnected { reason },
            ChannelEvent::ReconnectScheduled { attempt, delay } => {
                SessionUpdate::Reconnecting { attempt, delay }
            }
            ChannelEvent::ReconnectExhausted { attempts } => {
                SessionUpdate::ReconnectExhausted { attempts }
            }
        }
    }

    /// Release the live channel. Safe to call any number of times.
    pub async fn teardown(&mut self) {
        self.token.cancel();
        if self.channel_released {
            return;
        }
        self.channel_released = true;
        self.channel.close().await;
        if self.phase != SessionPhase::Terminated {
            self.phase = SessionPhase::TornDown;
        }
        info!(user_id = ?self.user_id.as_ref().map(Identifier::as_str), "session torn down");
    }

    /// User navigated to the composer.
    pub fn focus_composer(&mut self) -> bool {
        self.attention.focus_composer()
    }

    /// User navigated to the status view.
    pub fn focus_status(&mut self) -> bool {
        self.attention.focus_status()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn active_view(&self) -> ActiveView {
        self.attention.active_view()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase.is_loading()
    }

    pub fn user_id(&self) -> Option<&Identifier> {
        self.user_id.as_ref()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Handle for tearing the session down from outside the owning task.
    pub fn teardown_token(&self) -> TeardownToken {
        self.token.clone()
    }

    fn is_torn_down(&self) -> bool {
        self.token.is_torn_down() || self.phase == SessionPhase::TornDown
    }

    /// Finish a teardown requested while `start()` was suspended.
    async fn ensure_live(&mut self) -> Result<(), SessionError> {
        if self.token.is_torn_down() {
            debug!(phase = ?self.phase, "teardown observed during startup; discarding result");
            self.teardown().await;
            return Err(SessionError::TornDown);
        }
        Ok(())
    }

    fn terminate(&mut self, err: SessionError) -> SessionError {
        warn!(phase = ?self.phase, "session terminated: {}", err);
        self.phase = SessionPhase::Terminated;
        err
    }
}
