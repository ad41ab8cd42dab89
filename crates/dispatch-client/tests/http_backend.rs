mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatch_client::error::VerificationError;
use dispatch_client::{
    Backend, BackendError, ClientConfig, HttpBackend, Identifier, Sender, history, verification,
};
use serde_json::{Value, json};
use support::{closed_addr, spawn_http_server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
struct Seen {
    verify_bodies: Vec<Value>,
    history_queries: Vec<String>,
    request_ids: Vec<String>,
}

type Shared = Arc<Mutex<Seen>>;

async fn verify_route(
    State(seen): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut seen = seen.lock().expect("seen");
    if let Some(id) = headers.get("x-request-id").and_then(|value| value.to_str().ok()) {
        seen.request_ids.push(id.to_string());
    }
    let authorized = body.get("telegramId") == Some(&json!("alice"));
    seen.verify_bodies.push(body);
    if authorized {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn messages_route(
    State(seen): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let user_id = query.get("userId").cloned().unwrap_or_default();
    seen.lock().expect("seen").history_queries.push(user_id.clone());
    match user_id.as_str() {
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "db down"})),
        ),
        "garbled" => (StatusCode::OK, Json(json!({"not": "an array"}))),
        _ => (
            StatusCode::OK,
            Json(json!([
                {
                    "content": format!("hello from {user_id}"),
                    "created_at": "2024-05-01T12:00:00.000Z",
                    "replies": [
                        {"reply_content": "copy", "reply_at": "2024-05-01T12:01:00.000Z"},
                        {"reply_content": "eta 10m", "reply_at": "2024-05-01T12:02:00.000Z"}
                    ]
                },
                {"content": "second", "created_at": "2024-05-01T13:00:00.000Z", "replies": null}
            ])),
        ),
    }
}

async fn spawn_backend() -> Result<(HttpBackend, Shared, tokio::sync::oneshot::Sender<()>)> {
    let seen: Shared = Arc::new(Mutex::new(Seen::default()));
    let app = Router::new()
        .route("/verify", post(verify_route))
        .route("/messages", get(messages_route))
        .with_state(Arc::clone(&seen));
    let (addr, shutdown) = spawn_http_server(app).await?;
    let backend = HttpBackend::new(&ClientConfig::new(format!("http://{addr}/")))?;
    Ok((backend, seen, shutdown))
}

fn id(raw: &str) -> Identifier {
    Identifier::new(raw).expect("identifier")
}

#[tokio::test]
async fn verify_posts_telegram_id_and_accepts_2xx() -> Result<()> {
    let (backend, seen, shutdown) = spawn_backend().await?;

    backend.verify(&id("alice")).await?;
    let authorized = verification::verify(&backend, &id("alice")).await?;
    assert_eq!(authorized.identifier.as_str(), "alice");

    let seen = seen.lock().expect("seen");
    assert_eq!(seen.verify_bodies, vec![json!({"telegramId": "alice"}); 2]);
    assert_eq!(seen.request_ids.len(), 2);
    assert!(seen.request_ids.iter().all(|id| id.starts_with("req_")));
    assert_ne!(seen.request_ids[0], seen.request_ids[1]);

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn non_2xx_verification_is_unauthorized() -> Result<()> {
    let (backend, _seen, shutdown) = spawn_backend().await?;

    let raw = backend.verify(&id("mallory")).await;
    assert!(matches!(
        raw,
        Err(BackendError::Http { status, .. }) if status == StatusCode::UNAUTHORIZED
    ));

    let classified = verification::verify(&backend, &id("mallory")).await;
    assert!(matches!(
        classified,
        Err(VerificationError::Unauthorized { status }) if status == StatusCode::UNAUTHORIZED
    ));

    let _ = shutdown.send(());
    Ok(())
}

/// Answers every request with a 401 that promises more body than it sends.
async fn spawn_truncating_server() -> Result<std::net::SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut chunk = [0_u8; 1024];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        request.extend_from_slice(&chunk[..n]);
                        if request.ends_with(b"}") {
                            break;
                        }
                    }
                }
            }
            let _ = stream
                .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 64\r\n\r\nshort")
                .await;
            let _ = stream.flush().await;
        }
    });
    Ok(addr)
}

#[tokio::test]
async fn non_2xx_with_truncated_body_is_still_unauthorized() -> Result<()> {
    let addr = spawn_truncating_server().await?;
    let backend = HttpBackend::new(&ClientConfig::new(format!("http://{addr}")))?;

    let raw = backend.verify(&id("alice")).await;
    assert!(matches!(
        raw,
        Err(BackendError::Http { status, .. }) if status == StatusCode::UNAUTHORIZED
    ));

    let classified = verification::verify(&backend, &id("alice")).await;
    assert!(matches!(
        classified,
        Err(VerificationError::Unauthorized { status }) if status == StatusCode::UNAUTHORIZED
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_failure() -> Result<()> {
    let addr = closed_addr().await?;
    let backend = HttpBackend::new(&ClientConfig::new(format!("http://{addr}")))?;

    let result = verification::verify(&backend, &id("alice")).await;
    assert!(matches!(result, Err(VerificationError::Transport { .. })));

    assert!(history::fetch(&backend, &id("alice")).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn history_is_flattened_in_server_order() -> Result<()> {
    let (backend, seen, shutdown) = spawn_backend().await?;

    let timeline = history::hydrate(&backend, &id("bob smith&co")).await;
    let flattened: Vec<(Sender, &str)> = timeline
        .iter()
        .map(|message| (message.sender(), message.text()))
        .collect();
    assert_eq!(
        flattened,
        vec![
            (Sender::Driver, "hello from bob smith&co"),
            (Sender::Dispatcher, "copy"),
            (Sender::Dispatcher, "eta 10m"),
            (Sender::Driver, "second"),
        ]
    );
    assert!(timeline.is_hydrated());
    assert_eq!(
        seen.lock().expect("seen").history_queries,
        vec!["bob smith&co".to_string()]
    );

    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn history_failures_degrade_to_empty() -> Result<()> {
    let (backend, _seen, shutdown) = spawn_backend().await?;

    let err = backend
        .fetch_history(&id("broken"))
        .await
        .expect_err("500 must fail");
    assert!(err.to_string().starts_with("backend_http_500"));
    assert!(history::fetch(&backend, &id("broken")).await.is_empty());

    assert!(matches!(
        backend.fetch_history(&id("garbled")).await,
        Err(BackendError::Decode { .. })
    ));
    let timeline = history::hydrate(&backend, &id("garbled")).await;
    assert!(timeline.is_empty());
    assert!(timeline.is_hydrated());

    let _ = shutdown.send(());
    Ok(())
}
