mod common;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(app: &common::TestApp) -> Client {
    let (ws, _) = connect_async(app.ws_address.as_str())
        .await
        .expect("Failed to open MCP WebSocket");
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("Server sent invalid JSON");
        }
    }
}

async fn send(ws: &mut Client, payload: Value) {
    ws.send(Message::Text(payload.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Connect and consume the ready notification
async fn ready_client(app: &common::TestApp) -> Client {
    let mut ws = connect(app).await;
    let ready = next_json(&mut ws).await;
    assert_eq!(ready["method"], "notifications/server/ready");
    ws
}

#[tokio::test]
async fn session_opens_with_ready_notification() {
    let app = common::spawn_app().await;
    let mut ws = connect(&app).await;

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["jsonrpc"], "2.0");
    assert_eq!(ready["method"], "notifications/server/ready");
    assert_eq!(ready["params"]["serverInfo"]["name"], "toolgate");
    assert_eq!(ready["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(ready["params"]["toolCount"], 2);
    assert!(ready["params"]["sessionId"].is_string());
    assert!(ready.get("id").is_none());
}

#[tokio::test]
async fn initialize_then_list_tools() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    send(
        &mut ws,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "integration", "version": "0.0.1"}
            }
        }),
    )
    .await;
    let init = next_json(&mut ws).await;
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "toolgate");

    send(&mut ws, json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    send(&mut ws, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;

    // The notification produced nothing, so the next frame answers id 2
    let list = next_json(&mut ws).await;
    assert_eq!(list["id"], 2);
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["component_health", "echo"]);
}

#[tokio::test]
async fn echo_tool_round_trip() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    send(
        &mut ws,
        json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"value": "hi"}}
        }),
    )
    .await;

    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], "call-1");
    assert_eq!(resp["result"]["content"][0]["type"], "text");
    assert_eq!(resp["result"]["content"][0]["text"], "hi");
}

#[tokio::test]
async fn responses_follow_request_order() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    for id in 0..5 {
        send(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"value": id}}
            }),
        )
        .await;
    }
    for id in 0..5 {
        let resp = next_json(&mut ws).await;
        assert_eq!(resp["id"], id);
    }
}

#[tokio::test]
async fn malformed_frame_gets_parse_error_and_session_survives() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    ws.send(Message::Text("{not json".to_string()))
        .await
        .expect("Failed to send frame");
    let err = next_json(&mut ws).await;
    assert_eq!(err["id"], Value::Null);
    assert_eq!(err["error"]["code"], -32700);

    send(&mut ws, json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})).await;
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["id"], 9);
    assert_eq!(pong["result"], json!({}));
}

#[tokio::test]
async fn unknown_tool_and_method_use_different_channels() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    send(
        &mut ws,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "ghost"}}),
    )
    .await;
    let tool = next_json(&mut ws).await;
    assert_eq!(tool["result"]["isError"], true);
    assert_eq!(tool["result"]["structuredContent"]["error"], "TOOL_NOT_FOUND");

    send(&mut ws, json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"})).await;
    let method = next_json(&mut ws).await;
    assert_eq!(method["error"]["code"], -32601);
}

#[tokio::test]
async fn elevated_tool_is_refused_without_privileges() {
    let app = common::spawn_app().await;
    let mut ws = ready_client(&app).await;

    send(
        &mut ws,
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "component_health"}}),
    )
    .await;
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["result"]["isError"], true);
    assert_eq!(
        resp["result"]["structuredContent"]["error"],
        "PRIVILEGE_REQUIRED"
    );
}

#[tokio::test]
async fn closed_connections_leave_session_statistics() {
    let app = common::spawn_app().await;
    let ws = ready_client(&app).await;
    drop(ws);

    let mut closed = 0;
    for _ in 0..50 {
        let body: Value = reqwest::get(&format!("{}/health_check", &app.address))
            .await
            .expect("Failed to execute request.")
            .json()
            .await
            .expect("Invalid JSON body");
        closed = body["sessions"]["closed"].as_u64().unwrap();
        if closed == 1 {
            assert_eq!(body["sessions"]["active"], 0);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(closed, 1);
}
