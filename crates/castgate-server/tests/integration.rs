//! End-to-end integration tests using a real `WebSocket` client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use castgate_core::rpc::{RpcCommandType, RpcReply, RpcRequest, StreamInstructions};
use castgate_rpc::{Backend, RpcClientError};
use castgate_server::server::CastgateServer;
use castgate_settings::GatewaySettings;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Fake backend ──

/// Application backend stand-in.
///
/// - `connect`: rejects URLs containing `token=bad`; otherwise identifies
///   the client as `user:1` and attaches stream `room-1`
/// - `subscribe`: rejects `Forbidden`, otherwise attaches `<identifier>-stream`
/// - `message` with data `"stop"`: replies `stop: true`
/// - `disconnect`: recorded on a channel
struct FakeBackend {
    connect_delay: Duration,
    disconnects: mpsc::UnboundedSender<RpcRequest>,
}

#[async_trait]
impl Backend for FakeBackend {
    async fn call(&self, request: &RpcRequest) -> Result<RpcReply, RpcClientError> {
        let payload = &request.payload;
        Ok(match request.command_type {
            RpcCommandType::Connect => {
                tokio::time::sleep(self.connect_delay).await;
                let url = payload["env"]["url"].as_str().unwrap_or_default();
                if url.contains("token=bad") {
                    RpcReply::failure()
                } else {
                    RpcReply {
                        identifiers: Some("user:1".into()),
                        streams: StreamInstructions {
                            subscribe: vec!["room-1".into()],
                            unsubscribe: vec![],
                        },
                        transmissions: vec![json!(r#"{"type":"welcome"}"#)],
                        ..RpcReply::ok()
                    }
                }
            }
            RpcCommandType::Command => {
                let identifier = payload["identifier"].as_str().unwrap_or_default();
                match payload["command"].as_str() {
                    Some("subscribe") if identifier == "Forbidden" => RpcReply::failure(),
                    Some("subscribe") => RpcReply {
                        streams: StreamInstructions {
                            subscribe: vec![format!("{identifier}-stream")],
                            unsubscribe: vec![],
                        },
                        ..RpcReply::ok()
                    },
                    Some("message") if payload["data"] == "stop" => RpcReply {
                        stop: true,
                        ..RpcReply::ok()
                    },
                    _ => RpcReply::ok(),
                }
            }
            RpcCommandType::Disconnect => {
                let _ = self.disconnects.send(request.clone());
                RpcReply::ok()
            }
        })
    }
}

struct TestGateway {
    server: Arc<CastgateServer>,
    ws_url: String,
    http_url: String,
    disconnects: mpsc::UnboundedReceiver<RpcRequest>,
}

fn test_settings() -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    // Keep pings out of the way of frame assertions.
    settings.server.ping_interval_secs = 3600;
    settings.server.heartbeat_timeout_secs = 7200;
    settings.broadcast.secret = Some(SECRET.into());
    settings
}

/// Boot a test server and return its URLs.
async fn boot(settings: GatewaySettings, connect_delay: Duration) -> TestGateway {
    let (tx, rx) = mpsc::unbounded_channel();
    let backend = Arc::new(FakeBackend {
        connect_delay,
        disconnects: tx,
    });
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let server = Arc::new(CastgateServer::new(settings, backend, metrics_handle));
    let (addr, _handle) = server.listen().await.unwrap();

    TestGateway {
        ws_url: format!("ws://{addr}/cable"),
        http_url: format!("http://{addr}"),
        server,
        disconnects: rx,
    }
}

async fn boot_default() -> TestGateway {
    boot(test_settings(), Duration::ZERO).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Next JSON text frame, skipping pings.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] != "ping" {
                return value;
            }
        }
    }
}

/// Whether the server closes the socket within the timeout.
async fn closed_by_server(ws: &mut WsStream) -> bool {
    loop {
        match timeout(TIMEOUT, ws.next()).await {
            Ok(None | Some(Err(_) | Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => {}
            Err(_) => return false,
        }
    }
}

async fn send_frame(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn broadcast(gw: &TestGateway, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/_broadcast", gw.http_url))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ── Tests ──

#[tokio::test]
async fn connect_then_receive_broadcast() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "welcome"}));

    let resp = broadcast(&gw, json!({"stream": "room-1", "payload": "hi", "token": SECRET})).await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["recipients"], 1);

    assert_eq!(next_frame(&mut ws).await, json!({"message": "hi"}));
}

#[tokio::test]
async fn bad_broadcast_token_is_rejected_and_not_delivered() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    let resp = broadcast(&gw, json!({"stream": "room-1", "payload": "hi", "token": "guess"})).await;
    assert_eq!(resp.status(), 401);

    // A valid broadcast afterwards is the first thing the client sees.
    let resp = broadcast(&gw, json!({"stream": "room-1", "payload": "ok", "token": SECRET})).await;
    assert_eq!(resp.status(), 202);
    assert_eq!(next_frame(&mut ws).await, json!({"message": "ok"}));
}

#[tokio::test]
async fn rejected_connect_gets_disconnect_and_is_never_registered() {
    let gw = boot_default().await;
    let mut ws = connect(&format!("{}?token=bad", gw.ws_url)).await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "disconnect", "reason": "unauthorized", "reconnect": false})
    );
    assert!(closed_by_server(&mut ws).await);
    assert!(gw.server.registry().is_empty());
    assert_eq!(gw.server.bus().topic_count(), 0);
}

#[tokio::test]
async fn subscribe_confirm_and_channel_broadcast() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    send_frame(&mut ws, json!({"command": "subscribe", "identifier": "Chat"})).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "confirm_subscription", "identifier": "Chat"})
    );

    let resp = broadcast(
        &gw,
        json!({"stream": "Chat-stream", "payload": {"text": "yo"}, "token": SECRET}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"identifier": "Chat", "message": {"text": "yo"}})
    );
}

#[tokio::test]
async fn forbidden_subscribe_is_rejected() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    send_frame(&mut ws, json!({"command": "subscribe", "identifier": "Forbidden"})).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "reject_subscription", "identifier": "Forbidden"})
    );
    assert_eq!(gw.server.bus().subscriber_count("Forbidden-stream"), 0);
}

#[tokio::test]
async fn invalid_frame_is_ignored() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    send_frame(&mut ws, json!({"command": "subscribe", "identifier": "Chat"})).await;

    assert_eq!(next_frame(&mut ws).await["type"], "confirm_subscription");
}

#[tokio::test]
async fn backend_stop_closes_and_issues_disconnect() {
    let mut gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    send_frame(
        &mut ws,
        json!({"command": "message", "identifier": "Chat", "data": "stop"}),
    )
    .await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "disconnect", "reason": "remote", "reconnect": false})
    );
    assert!(closed_by_server(&mut ws).await);

    let disconnect = timeout(TIMEOUT, gw.disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(disconnect.identifiers.as_deref(), Some("user:1"));
    assert_eq!(disconnect.payload["reason"], "remote");
    let server = gw.server.clone();
    assert!(wait_until(|| server.registry().is_empty()).await);
}

#[tokio::test]
async fn client_close_removes_subscriptions() {
    let mut gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;
    assert_eq!(gw.server.registry().len(), 1);
    assert_eq!(gw.server.bus().subscriber_count("room-1"), 1);

    ws.close(None).await.unwrap();

    let server = gw.server.clone();
    assert!(wait_until(|| server.registry().is_empty() && server.bus().topic_count() == 0).await);
    let disconnect = timeout(TIMEOUT, gw.disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(disconnect.payload["reason"], "client_closed");

    let resp = broadcast(&gw, json!({"stream": "room-1", "payload": "late", "token": SECRET})).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["recipients"], 0);
}

#[tokio::test]
async fn saturated_backend_rejects_with_server_error() {
    let mut settings = test_settings();
    settings.rpc.concurrency = 1;
    settings.rpc.acquire_timeout_ms = 50;
    let gw = boot(settings, Duration::from_millis(500)).await;

    let url = gw.ws_url.clone();
    let first = tokio::spawn(async move {
        let mut ws = connect(&url).await;
        next_frame(&mut ws).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut second = connect(&gw.ws_url).await;

    assert_eq!(
        next_frame(&mut second).await,
        json!({"type": "disconnect", "reason": "server_error", "reconnect": true})
    );
    assert_eq!(first.await.unwrap(), json!({"type": "welcome"}));
}

#[tokio::test]
async fn shutdown_notifies_clients() {
    let mut gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    gw.server.shutdown().shutdown();

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "disconnect", "reason": "server_restart", "reconnect": true})
    );
    let disconnect = timeout(TIMEOUT, gw.disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(disconnect.payload["reason"], "server_restart");
}

#[tokio::test]
async fn health_reports_connections() {
    let gw = boot_default().await;
    let mut ws = connect(&gw.ws_url).await;
    let _welcome = next_frame(&mut ws).await;

    let health: Value = reqwest::get(format!("{}/health", gw.http_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["streams"], 1);
}

#[tokio::test]
async fn slow_consumer_overflow_closes_and_cleans_up() {
    let mut settings = test_settings();
    settings.server.outbound_buffer_size = 4;
    let mut gw = boot(settings, Duration::ZERO).await;

    // Never read past the welcome: socket buffers fill, then the queue.
    let mut ws = connect(&gw.ws_url).await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "welcome"}));
    assert_eq!(gw.server.bus().subscriber_count("room-1"), 1);

    let payload = json!("x".repeat(64 * 1024));
    let server = gw.server.clone();
    for i in 0..1024 {
        if server.registry().is_empty() {
            break;
        }
        let _ = server.bus().publish("room-1", &payload);
        if i % 8 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    assert!(wait_until(|| server.registry().is_empty() && server.bus().topic_count() == 0).await);
    let disconnect = timeout(TIMEOUT, gw.disconnects.recv()).await.unwrap().unwrap();
    assert_eq!(disconnect.payload["reason"], "overflow");
    assert_eq!(disconnect.payload["subscriptions"], json!([]));
    drop(ws);
}

/// A loopback address nothing is listening on yet.
async fn free_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

fn node_settings(name: &str, secret: &str, listen: &str, peers: &[&str]) -> GatewaySettings {
    let mut settings = test_settings();
    settings.broadcast.secret = Some(secret.into());
    settings.cluster.node_id = Some(name.into());
    settings.cluster.listen = Some(listen.into());
    settings.cluster.peers = peers.iter().map(|p| (*p).to_string()).collect();
    settings
}

#[tokio::test]
async fn broadcast_on_one_node_reaches_client_on_peer() {
    let (a_relay, b_relay) = (free_addr().await, free_addr().await);
    let node_a = boot(node_settings("node-a", SECRET, &a_relay, &[&b_relay]), Duration::ZERO).await;
    let node_b = boot(node_settings("node-b", SECRET, &b_relay, &[&a_relay]), Duration::ZERO).await;

    let mut ws = connect(&node_b.ws_url).await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "welcome"}));

    let resp = broadcast(
        &node_a,
        json!({"stream": "room-1", "payload": "from-a", "token": SECRET}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["recipients"], 0);

    assert_eq!(next_frame(&mut ws).await, json!({"message": "from-a"}));
}

#[tokio::test]
async fn peer_with_wrong_secret_delivers_nothing() {
    let (b_relay, c_relay) = (free_addr().await, free_addr().await);
    let node_b = boot(node_settings("node-b", SECRET, &b_relay, &[]), Duration::ZERO).await;
    let node_c = boot(
        node_settings("node-c", "other-secret", &c_relay, &[&b_relay]),
        Duration::ZERO,
    )
    .await;

    let mut ws = connect(&node_b.ws_url).await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "welcome"}));

    let resp = broadcast(
        &node_c,
        json!({"stream": "room-1", "payload": "intruder", "token": "other-secret"}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The next frame B's client sees is B's own broadcast.
    let resp = broadcast(
        &node_b,
        json!({"stream": "room-1", "payload": "local", "token": SECRET}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    assert_eq!(next_frame(&mut ws).await, json!({"message": "local"}));
}
