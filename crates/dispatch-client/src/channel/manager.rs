//! Websocket-backed live channel with a single supervisor task.
//!
//! The supervisor owns the socket: it performs the Engine.IO/Socket.IO
//! handshake, emits `socket register`, answers pings, decodes inbound events
//! into an unbounded queue, writes outbound events, and reconnects with backoff.
//! The manager talks to it only through queues and a state watch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::packet::{
    CONNECT_FRAME, DISCONNECT_FRAME, EnginePacket, OpenHandshake, PONG_FRAME, SocketPacket,
    decode_engine, decode_socket, encode_event,
};
use super::{
    ChannelEvent, ChannelState, EVENT_REPLY, LiveChannel, OutboundEvent, ReconnectPolicy,
    ReplyPayload,
};
use crate::config::ClientConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::identity::Identifier;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Live channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Socket.IO live channel.
pub struct SocketIoChannel {
    url: Url,
    config: ChannelConfig,
    state: Arc<watch::Sender<ChannelState>>,
    outbound_tx: Option<mpsc::UnboundedSender<OutboundEvent>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    task: Option<JoinHandle<()>>,
}

impl SocketIoChannel {
    /// Create a channel with default config. Nothing connects until `open`.
    pub fn new(url: &str) -> ChannelResult<Self> {
        Self::with_config(url, ChannelConfig::default())
    }

    pub fn with_config(url: &str, config: ChannelConfig) -> ChannelResult<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ChannelError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }
        let (state, _) = watch::channel(ChannelState::Idle);

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(state),
            outbound_tx: None,
            inbound_rx: None,
            task: None,
        })
    }

    /// Channel pointed at the backend's Socket.IO endpoint.
    pub fn from_client_config(config: &ClientConfig) -> ChannelResult<Self> {
        let url = config
            .socket_url()
            .map_err(|error| ChannelError::InvalidUrl(error.to_string()))?;
        Self::with_config(url.as_str(), ChannelConfig::from_client_config(config))
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Watch lifecycle transitions, e.g. to render a persistent-disconnect banner.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }
}

#[async_trait]
impl LiveChannel for SocketIoChannel {
    async fn open(&mut self, identifier: &Identifier) -> ChannelResult<()> {
        match self.state() {
            ChannelState::Idle => {}
            ChannelState::Closed => return Err(ChannelError::Closed),
            _ => return Err(ChannelError::AlreadyOpen),
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.state.send_replace(ChannelState::Connecting);

        let supervisor = Supervisor {
            url: self.url.clone(),
            config: self.config.clone(),
            username: identifier.as_str().to_string(),
            state: Arc::clone(&self.state),
            outbound_rx,
            inbound_tx,
        };
        self.task = Some(tokio::spawn(supervisor.run()));
        self.outbound_tx = Some(outbound_tx);
        self.inbound_rx = Some(inbound_rx);

        info!(url = %self.url, user_id = %identifier, "live channel opening");
        Ok(())
    }

    fn send(&self, event: OutboundEvent) {
        let state = self.state();
        if state != ChannelState::Registered {
            warn!(event = event.name(), state = ?state, "dropping outbound event; channel not registered");
            return;
        }
        let Some(outbound_tx) = &self.outbound_tx else {
            warn!(event = event.name(), "dropping outbound event; channel not open");
            return;
        };
        if outbound_tx.send(event).is_err() {
            warn!("dropping outbound event; channel task stopped");
        }
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.state() == ChannelState::Closed {
            return None;
        }
        match self.inbound_rx.as_mut() {
            Some(inbound_rx) => inbound_rx.recv().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        if self.state() == ChannelState::Closed {
            debug!(url = %self.url, "close on closed channel ignored");
            return;
        }

        // Dropping the outbound sender is the supervisor's shutdown signal.
        let was_open = self.outbound_tx.take().is_some();
        if let Some(mut task) = self.task.take()
            && timeout(CLOSE_GRACE, &mut task).await.is_err()
        {
            warn!(url = %self.url, "live channel did not stop in time; aborting");
            task.abort();
        }
        self.inbound_rx = None;
        self.state.send_replace(ChannelState::Closed);

        if was_open {
            info!(url = %self.url, "live channel closed");
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Connection {
    ws: WsStream,
    handshake: OpenHandshake,
    sid: Option<String>,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
    ServerDisconnect,
}

struct Supervisor {
    url: Url,
    config: ChannelConfig,
    username: String,
    state: Arc<watch::Sender<ChannelState>>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
    inbound_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(ChannelState::Connecting);
            match self.connect().await {
                Ok(connection) => {
                    failures = 0;
                    match self.serve(connection).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Dropped(reason) => {
                            if !self.disconnected(reason) {
                                return;
                            }
                        }
                        SessionEnd::ServerDisconnect => {
                            // Server-initiated disconnects are not retried.
                            if self.disconnected("io server disconnect".to_string()) {
                                self.idle_until_shutdown().await;
                            }
                            return;
                        }
                    }
                }
                Err(error) => {
                    warn!(url = %self.url, "live channel connect failed: {}", error);
                    if !self.disconnected(error.to_string()) {
                        return;
                    }
                }
            }

            if !self.config.reconnect.allows(failures) {
                warn!(url = %self.url, attempts = failures, "reconnect attempts exhausted");
                if self.emit(ChannelEvent::ReconnectExhausted { attempts: failures }) {
                    self.idle_until_shutdown().await;
                }
                return;
            }

            let delay = self.config.reconnect.delay(failures);
            failures = failures.saturating_add(1);
            debug!(
                url = %self.url,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            if !self.emit(ChannelEvent::ReconnectScheduled {
                attempt: failures,
                delay,
            }) {
                return;
            }
            if !self.wait(delay).await {
                return;
            }
        }
    }

    async fn connect(&self) -> ChannelResult<Connection> {
        let connect_timeout = self.config.connect_timeout;
        let timeout_error =
            || ChannelError::Timeout(format!("connection timeout after {:?}", connect_timeout));

        let (mut ws, _response) = timeout(connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| timeout_error())?
            .map_err(|error| ChannelError::WebSocket(error.to_string()))?;

        let handshake = timeout(connect_timeout, read_open_handshake(&mut ws))
            .await
            .map_err(|_| timeout_error())??;
        ws.send(Message::Text(CONNECT_FRAME.into()))
            .await
            .map_err(|error| ChannelError::WebSocket(error.to_string()))?;
        let sid = timeout(connect_timeout, read_namespace_connect(&mut ws))
            .await
            .map_err(|_| timeout_error())??;

        Ok(Connection { ws, handshake, sid })
    }

    async fn serve(&mut self, connection: Connection) -> SessionEnd {
        let Connection {
            mut ws,
            handshake,
            sid,
        } = connection;
        let ping_window =
            Duration::from_millis(handshake.ping_interval.saturating_add(handshake.ping_timeout));

        let register = OutboundEvent::Register {
            username: self.username.clone(),
        };
        if let Err(error) = send_event(&mut ws, &register).await {
            return SessionEnd::Dropped(error.to_string());
        }
        self.state.send_replace(ChannelState::Registered);
        info!(
            url = %self.url,
            engine_sid = %handshake.sid,
            sid = ?sid,
            "socket connected"
        );
        if !self.emit(ChannelEvent::Connected { sid }) {
            close_gracefully(&mut ws).await;
            return SessionEnd::Shutdown;
        }

        let mut deadline = Instant::now() + ping_window;
        loop {
            tokio::select! {
                outbound = self.outbound_rx.recv() => match outbound {
                    None => {
                        close_gracefully(&mut ws).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(event) => {
                        if let Err(error) = send_event(&mut ws, &event).await {
                            return SessionEnd::Dropped(error.to_string());
                        }
                        debug!(event = event.name(), "event emitted");
                    }
                },
                () = sleep_until(deadline) => {
                    return SessionEnd::Dropped("ping timeout".to_string());
                }
                frame = ws.next() => {
                    deadline = Instant::now() + ping_window;
                    match frame {
                        None | Some(Ok(Message::Close(_))) => {
                            return SessionEnd::Dropped("transport close".to_string());
                        }
                        Some(Err(error)) => {
                            return SessionEnd::Dropped(format!("transport error: {}", error));
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.handle_text(&mut ws, text.as_str()).await {
                                return end;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            debug!("received ping from {} ({} bytes)", self.url, payload.len());
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn handle_text(&self, ws: &mut WsStream, text: &str) -> Option<SessionEnd> {
        let packet = match decode_engine(text) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("engine parse error on {}: {}", self.url, error);
                return None;
            }
        };

        match packet {
            EnginePacket::Ping(_) => {
                if let Err(error) = ws.send(Message::Text(PONG_FRAME.into())).await {
                    return Some(SessionEnd::Dropped(error.to_string()));
                }
                None
            }
            EnginePacket::Close => Some(SessionEnd::Dropped("server close".to_string())),
            EnginePacket::Message(body) => self.handle_socket_packet(&body),
            EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => None,
        }
    }

    fn handle_socket_packet(&self, body: &str) -> Option<SessionEnd> {
        let packet = match decode_socket(body) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("socket parse error on {}: {}", self.url, error);
                return None;
            }
        };
        if !packet.is_default_namespace() {
            debug!(namespace = packet.namespace(), "ignoring packet for other namespace");
            return None;
        }

        match packet {
            SocketPacket::Event { name, args, .. } if name == EVENT_REPLY => {
                let Some(payload) = args.into_iter().next() else {
                    warn!("reply event without payload");
                    return None;
                };
                match serde_json::from_value::<ReplyPayload>(payload) {
                    Ok(reply) => {
                        if !self.emit(ChannelEvent::Reply(reply)) {
                            return Some(SessionEnd::Shutdown);
                        }
                    }
                    Err(error) => warn!("invalid reply payload: {}", error),
                }
                None
            }
            SocketPacket::Event { name, .. } => {
                debug!(event = %name, "ignoring unhandled event");
                None
            }
            SocketPacket::Disconnect { .. } => Some(SessionEnd::ServerDisconnect),
            SocketPacket::ConnectError { payload, .. } => Some(SessionEnd::Dropped(format!(
                "connect error: {}",
                payload.map(|value| value.to_string()).unwrap_or_default()
            ))),
            SocketPacket::Connect { .. } | SocketPacket::Ack { .. } => None,
        }
    }

    /// Mark the channel disconnected. Returns `false` if the consumer is gone.
    fn disconnected(&self, reason: String) -> bool {
        self.state.send_replace(ChannelState::Disconnected);
        info!(url = %self.url, reason = %reason, "socket disconnected");
        self.emit(ChannelEvent::Disconnected { reason })
    }

    fn emit(&self, event: ChannelEvent) -> bool {
        self.inbound_tx.send(event).is_ok()
    }

    /// Sleep for `delay`, discarding outbound events. Returns `false` on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                outbound = self.outbound_rx.recv() => match outbound {
                    None => return false,
                    Some(event) => {
                        warn!(event = event.name(), "dropping outbound event while disconnected");
                    }
                },
            }
        }
    }

    async fn idle_until_shutdown(&mut self) {
        while let Some(event) = self.outbound_rx.recv().await {
            warn!(event = event.name(), "dropping outbound event while disconnected");
        }
    }
}

async fn read_open_handshake(ws: &mut WsStream) -> ChannelResult<OpenHandshake> {
    while let Some(frame) = ws.next().await {
        match frame.map_err(|error| ChannelError::WebSocket(error.to_string()))? {
            Message::Text(text) => match decode_engine(text.as_str())? {
                EnginePacket::Open(handshake) => return Ok(handshake),
                EnginePacket::Close => break,
                other => debug!("ignoring engine packet before open: {:?}", other),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ChannelError::Handshake(
        "connection closed before engine open".to_string(),
    ))
}

async fn read_namespace_connect(ws: &mut WsStream) -> ChannelResult<Option<String>> {
    while let Some(frame) = ws.next().await {
        let text = match frame.map_err(|error| ChannelError::WebSocket(error.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match decode_engine(text.as_str())? {
            EnginePacket::Ping(_) => {
                ws.send(Message::Text(PONG_FRAME.into()))
                    .await
                    .map_err(|error| ChannelError::WebSocket(error.to_string()))?;
            }
            EnginePacket::Close => break,
            EnginePacket::Message(body) => match decode_socket(&body)? {
                SocketPacket::Connect { namespace, payload } if namespace == "/" => {
                    let sid = payload
                        .as_ref()
                        .and_then(|value| value.get("sid"))
                        .and_then(|value| value.as_str())
                        .map(str::to_string);
                    return Ok(sid);
                }
                SocketPacket::ConnectError { payload, .. } => {
                    return Err(ChannelError::Handshake(format!(
                        "namespace connect refused: {}",
                        payload.map(|value| value.to_string()).unwrap_or_default()
                    )));
                }
                other => debug!("ignoring socket packet before connect: {:?}", other),
            },
            _ => {}
        }
    }
    Err(ChannelError::Handshake(
        "connection closed before namespace connect".to_string(),
    ))
}

async fn send_event(ws: &mut WsStream, event: &OutboundEvent) -> ChannelResult<()> {
    let frame = encode_event(event.name(), &event.payload())?;
    ws.send(Message::Text(frame.into()))
        .await
        .map_err(|error| ChannelError::WebSocket(error.to_string()))
}

async fn close_gracefully(ws: &mut WsStream) {
    let _ = ws.send(Message::Text(DISCONNECT_FRAME.into())).await;
    let _ = ws.send(Message::Close(None)).await;
}
