//! Axum stubs speaking the backend's HTTP and Socket.IO surfaces.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub const OPEN_FRAME: &str =
    r#"0{"sid":"engine-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
pub const CONNECTED_FRAME: &str = r#"40{"sid":"socket-1"}"#;

/// How the Socket.IO stub treats each connection after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    /// Drop the transport of the first connection right after register.
    DropFirst,
    /// Send a Socket.IO DISCONNECT right after register.
    Kick,
    /// Answer chat with replies whose `messageId` is a float and a string.
    LooseIds,
}

pub struct SocketStub {
    behavior: Behavior,
    connections: AtomicUsize,
    frames: mpsc::UnboundedSender<(usize, String)>,
}

pub async fn spawn_http_server(app: Router) -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    Ok((addr, shutdown_tx))
}

/// Address on which nothing is listening.
pub async fn closed_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Router serving `/socket.io/`, plus a receiver of `(connection, frame)`
/// for every text frame the client sends.
pub fn socket_router(
    behavior: Behavior,
) -> (Router, mpsc::UnboundedReceiver<(usize, String)>) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let stub = Arc::new(SocketStub {
        behavior,
        connections: AtomicUsize::new(0),
        frames: frames_tx,
    });
    let router = Router::new()
        .route("/socket.io/", get(socket_io))
        .with_state(stub);
    (router, frames_rx)
}

async fn socket_io(ws: WebSocketUpgrade, State(stub): State<Arc<SocketStub>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, stub))
}

async fn serve_socket(mut socket: WebSocket, stub: Arc<SocketStub>) {
    let connection = stub.connections.fetch_add(1, Ordering::SeqCst) + 1;
    if socket
        .send(Message::Text(OPEN_FRAME.to_string()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let _ = stub.frames.send((connection, text.clone()));

        if text == "40" {
            let _ = socket
                .send(Message::Text(CONNECTED_FRAME.to_string()))
                .await;
            let _ = socket.send(Message::Text("2".to_string())).await;
            continue;
        }

        let Some((name, payload)) = decode_event(&text) else {
            continue;
        };
        match name.as_str() {
            "socket register" => match stub.behavior {
                Behavior::DropFirst if connection == 1 => return,
                Behavior::Kick => {
                    let _ = socket.send(Message::Text("41".to_string())).await;
                }
                _ => {}
            },
            "chat message" => {
                let content = payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let ids = if stub.behavior == Behavior::LooseIds {
                    vec![json!(5.0), json!("5")]
                } else {
                    vec![json!(7)]
                };
                for id in ids {
                    let reply =
                        json!(["reply", {"messageId": id, "reply": format!("ack: {content}")}]);
                    let _ = socket
                        .send(Message::Text(format!("42{reply}")))
                        .await;
                }
            }
            _ => {}
        }
    }
}

/// Parse a `42[...]` frame into its event name and first argument.
pub fn decode_event(frame: &str) -> Option<(String, Value)> {
    let body = frame.strip_prefix("42")?;
    let Value::Array(mut items) = serde_json::from_str::<Value>(body).ok()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let name = items.remove(0).as_str()?.to_string();
    let payload = items.into_iter().next().unwrap_or(Value::Null);
    Some((name, payload))
}

/// Wait for the next frame the client sent.
pub async fn next_frame(frames: &mut mpsc::UnboundedReceiver<(usize, String)>) -> (usize, String) {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("frame in time")
        .expect("frame")
}
