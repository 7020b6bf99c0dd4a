//! Integration tests for [`dbot_telegram::Updater`] in webhook mode, over real HTTP on an
//! ephemeral port.

mod common;

use common::{id_recorder, text_update, ScriptedBot};
use dbot_core::DbotError;
use dbot_telegram::{Mode, Updater, UpdaterState, WebhookOptions};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn started(bot: &Arc<ScriptedBot>) -> (Updater, SocketAddr, Arc<Mutex<Vec<i64>>>) {
    let updater = Updater::new(bot.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));
    updater.dispatcher().add_handler(id_recorder(&seen), 0);
    let addr = updater
        .start_webhook(WebhookOptions::default().listen("127.0.0.1").port(0).url_path("hook"))
        .await
        .unwrap();
    (updater, addr, seen)
}

fn update_json(update_id: i64) -> String {
    serde_json::to_string(&text_update(update_id, "hello")).unwrap()
}

async fn post(addr: SocketAddr, path: &str, content_type: &str, body: String) -> StatusCode {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .header("content-type", content_type)
        .body(body)
        .send()
        .await
        .unwrap()
        .status()
}

async fn wait_for(seen: &Arc<Mutex<Vec<i64>>>, count: usize) {
    for _ in 0..100 {
        if seen.lock().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// **Test: a valid update POSTed to the webhook path is enqueued exactly once.**
#[tokio::test]
async fn test_webhook_accepts_update() {
    let bot = ScriptedBot::new();
    let (updater, addr, seen) = started(&bot).await;
    assert_eq!(updater.state(), UpdaterState::Running(Mode::Webhook));

    let status = post(addr, "/hook", "application/json", update_json(42)).await;
    assert_eq!(status, StatusCode::OK);
    wait_for(&seen, 1).await;
    updater.stop().await;

    assert_eq!(*seen.lock(), vec![42]);
    let webhooks = bot.webhooks.lock();
    assert_eq!(webhooks.len(), 1);
    assert_eq!(webhooks[0].url, format!("https://127.0.0.1:{}/hook", addr.port()));
    assert_eq!(webhooks[0].max_connections, Some(40));
    assert_eq!(bot.deletes.load(Ordering::SeqCst), 0);
}

/// **Test: wrong path or method gives 404, a non-JSON content type 403, a broken body 400.**
#[tokio::test]
async fn test_webhook_rejections() {
    let bot = ScriptedBot::new();
    let (updater, addr, seen) = started(&bot).await;

    assert_eq!(post(addr, "/other", "application/json", update_json(1)).await, StatusCode::NOT_FOUND);
    let get = reqwest::get(format!("http://{addr}/hook")).await.unwrap();
    assert_eq!(get.status(), StatusCode::NOT_FOUND);
    assert_eq!(post(addr, "/hook", "text/plain", update_json(2)).await, StatusCode::FORBIDDEN);
    assert_eq!(
        post(addr, "/hook", "application/json", "{not json".to_string()).await,
        StatusCode::BAD_REQUEST
    );

    assert_eq!(post(addr, "/hook", "application/json", update_json(3)).await, StatusCode::OK);
    wait_for(&seen, 1).await;
    updater.stop().await;
    assert_eq!(*seen.lock(), vec![3]);
}

/// **Test: a body shorter than its Content-Length is not accepted, and the server keeps serving.**
#[tokio::test]
async fn test_webhook_survives_truncated_body() {
    let bot = ScriptedBot::new();
    let (updater, addr, seen) = started(&bot).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /hook HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n{{\"update_id\": 1"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = String::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut response)).await;
    drop(stream);
    assert!(!response.starts_with("HTTP/1.1 200"));

    assert_eq!(post(addr, "/hook", "application/json", update_json(7)).await, StatusCode::OK);
    wait_for(&seen, 1).await;
    updater.stop().await;
    assert_eq!(*seen.lock(), vec![7]);
}

/// **Test: after stop the port no longer answers.**
#[tokio::test]
async fn test_webhook_stop_closes_server() {
    let bot = ScriptedBot::new();
    let (updater, addr, _seen) = started(&bot).await;

    updater.stop().await;

    assert_eq!(updater.state(), UpdaterState::Idle);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[cfg(not(feature = "tls"))]
#[tokio::test]
async fn test_tls_without_feature_is_config_error() {
    let updater = Updater::new(ScriptedBot::new());
    let result = updater
        .start_webhook(WebhookOptions::default().port(0).tls("cert.pem", "key.pem"))
        .await;
    assert!(matches!(result, Err(DbotError::Config(_))));
    assert_eq!(updater.state(), UpdaterState::Idle);
}

#[tokio::test]
async fn test_cert_without_key_is_config_error() {
    let updater = Updater::new(ScriptedBot::new());
    let mut options = WebhookOptions::default().port(0);
    options.cert = Some("cert.pem".into());
    assert!(matches!(updater.start_webhook(options).await, Err(DbotError::Config(_))));
}
