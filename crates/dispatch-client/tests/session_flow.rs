mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::Json;
use axum::http::StatusCode;
use axum::routing::{get, post};
use dispatch_client::{
    ActiveView, AlertSink, ChannelState, ClientConfig, DispatchSession, HostPlatform, HostUser,
    HttpBackend, MessageOrigin, SessionPhase, SessionUpdate, Sender, SocketIoChannel, StaticHost,
};
use serde_json::{Value, json};
use support::{Behavior, decode_event, next_frame, socket_router, spawn_http_server};
use tokio::time::timeout;

fn host(username: &str) -> (Arc<dyn HostPlatform>, Arc<Mutex<Vec<String>>>) {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&alerts);
    let sink: AlertSink = Arc::new(move |message: &str| {
        captured.lock().expect("alerts").push(message.to_string());
    });
    let user = Some(HostUser::with_username(username));
    (Arc::new(StaticHost::new(user, sink)), alerts)
}

async fn verify(Json(body): Json<Value>) -> StatusCode {
    if body.get("telegramId") == Some(&json!("alice")) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn messages() -> Json<Value> {
    Json(json!([
        {
            "content": "load picked up",
            "created_at": "2024-05-01T08:00:00Z",
            "replies": [{"reply_content": "thanks", "reply_at": "2024-05-01T08:05:00Z"}]
        }
    ]))
}

#[tokio::test]
async fn driver_session_end_to_end() -> Result<()> {
    let (sockets, mut frames) = socket_router(Behavior::Normal);
    let app = axum::Router::new()
        .route("/verify", post(verify))
        .route("/messages", get(messages))
        .merge(sockets);
    let (addr, shutdown) = spawn_http_server(app).await?;

    let config = ClientConfig::new(format!("http://{addr}"));
    let backend = HttpBackend::new(&config)?;
    let channel = SocketIoChannel::from_client_config(&config)?;
    let (host, alerts) = host("alice");
    let mut session = DispatchSession::new(Some(host), backend, channel);

    session.start().await?;
    assert_eq!(session.phase(), SessionPhase::Live);
    assert_eq!(session.timeline().len(), 2);
    assert_eq!(session.active_view(), ActiveView::Composer);

    let update = timeout(Duration::from_secs(5), session.next_update()).await?;
    assert_eq!(update, Some(SessionUpdate::Connected));
    assert_eq!(session.channel_state(), ChannelState::Registered);

    session.send("low tire pressure")?;
    assert_eq!(session.active_view(), ActiveView::Status);

    let chat = loop {
        let (_, frame) = next_frame(&mut frames).await;
        if let Some((name, payload)) = decode_event(&frame)
            && name == "chat message"
        {
            break payload;
        }
    };
    assert_eq!(chat, json!({"userId": "alice", "content": "low tire pressure"}));

    assert!(session.focus_composer());
    let update = timeout(Duration::from_secs(5), session.next_update()).await?;
    assert_eq!(
        update,
        Some(SessionUpdate::MessageAppended { view_changed: true })
    );
    assert_eq!(session.active_view(), ActiveView::Status);

    let tail: Vec<(Sender, MessageOrigin, &str)> = session
        .timeline()
        .iter()
        .map(|message| (message.sender(), message.origin(), message.text()))
        .collect();
    assert_eq!(
        tail,
        vec![
            (Sender::Driver, MessageOrigin::History, "load picked up"),
            (Sender::Dispatcher, MessageOrigin::History, "thanks"),
            (Sender::Driver, MessageOrigin::Outbound, "low tire pressure"),
            (Sender::Dispatcher, MessageOrigin::Live, "ack: low tire pressure"),
        ]
    );

    session.teardown().await;
    session.teardown().await;
    assert_eq!(session.phase(), SessionPhase::TornDown);
    assert_eq!(session.channel_state(), ChannelState::Closed);
    assert!(session.next_update().await.is_none());
    assert!(alerts.lock().expect("alerts").is_empty());

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn unauthorized_driver_never_reaches_history_or_socket() -> Result<()> {
    let (sockets, mut frames) = socket_router(Behavior::Normal);
    let app = axum::Router::new()
        .route("/verify", post(verify))
        .route("/messages", get(messages))
        .merge(sockets);
    let (addr, shutdown) = spawn_http_server(app).await?;

    let config = ClientConfig::new(format!("http://{addr}"));
    let backend = HttpBackend::new(&config)?;
    let channel = SocketIoChannel::from_client_config(&config)?;
    let (host, alerts) = host("mallory");
    let mut session = DispatchSession::new(Some(host), backend, channel);

    let err = session.start().await.expect_err("unauthorized");
    assert!(err.is_fatal());
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(session.timeline().is_empty());
    assert_eq!(
        *alerts.lock().expect("alerts"),
        vec!["Unauthorized access.".to_string()]
    );
    assert_eq!(session.channel_state(), ChannelState::Idle);
    assert!(
        timeout(Duration::from_millis(200), frames.recv())
            .await
            .is_err()
    );

    session.teardown().await;
    assert_eq!(session.phase(), SessionPhase::Terminated);
    let _ = shutdown.send(());
    Ok(())
}
