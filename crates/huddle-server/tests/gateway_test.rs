//! End-to-end tests: REST and the WebSocket gateway against a live server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use huddle_server::config::Config;
use huddle_server::{build_router, build_state};
use huddle_types::error::ErrorKind;
use huddle_types::events::{MemberStatus, ServerEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    base_url: String,
    ws_url: String,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

struct TestUser {
    id: Uuid,
    token: String,
}

async fn start_test_server() -> TestServer {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = Config {
        jwt_secret: "test-secret".into(),
        db_path: dir.path().join("huddle.db"),
        upload_dir: dir.path().join("uploads"),
        ..Config::default()
    };

    let app = build_router(build_state(&config).expect("state"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        ws_url: format!("ws://{}/gateway", addr),
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

impl TestServer {
    async fn register(&self, username: &str) -> TestUser {
        let resp = self
            .client
            .post(format!("{}/auth/register", self.base_url))
            .json(&json!({ "username": username, "password": "password123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        TestUser {
            id: body["user_id"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    async fn post(&self, user: &TestUser, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, user: &TestUser, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap()
    }

    async fn connect(&self, user: &TestUser) -> Socket {
        let url = format!("{}?token={}", self.ws_url, user.token);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let hello = next_event(&mut ws).await.expect("connection ack");
        assert!(matches!(
            hello,
            ServerEvent::ConnectionEstablished { user_id, .. } if user_id == user.id
        ));
        ws
    }
}

async fn send(ws: &mut Socket, command: Value) {
    ws.send(Message::Text(command.to_string().into()))
        .await
        .unwrap();
}

/// Next event within a short window, or `None` if the server stayed quiet.
async fn next_event(ws: &mut Socket) -> Option<ServerEvent> {
    loop {
        let frame = tokio::time::timeout(Duration::from_millis(500), ws.next())
            .await
            .ok()??;
        match frame.unwrap() {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn join(ws: &mut Socket, room_id: Uuid) -> ServerEvent {
    send(ws, json!({ "type": "Join", "data": { "room_id": room_id } })).await;
    next_event(ws).await.expect("join reply")
}

#[tokio::test]
async fn auth_rejects_duplicates_and_bad_passwords() {
    let server = start_test_server().await;
    server.register("Bossm").await;

    let dup = server
        .client
        .post(format!("{}/auth/register", server.base_url))
        .json(&json!({ "username": "Bossm", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), 409);

    let bad = server
        .client
        .post(format!("{}/auth/login", server.base_url))
        .json(&json!({ "username": "Bossm", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);

    let anonymous = server
        .client
        .get(format!("{}/rooms", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);
}

#[tokio::test]
async fn messages_reach_members_and_nobody_else() {
    let server = start_test_server().await;
    let bossm = server.register("Bossm").await;
    let jam = server.register("Jam").await;
    let buboy = server.register("Buboy").await;

    let resp = server
        .post(&bossm, "/rooms/direct", json!({ "user_id": jam.id }))
        .await;
    assert_eq!(resp.status(), 200);
    let room: Value = resp.json().await.unwrap();
    assert_eq!(room["display_name"], "Jam");
    let room_id: Uuid = room["id"].as_str().unwrap().parse().unwrap();

    // Same conversation regardless of who opens it.
    let again: Value = server
        .post(&jam, "/rooms/direct", json!({ "user_id": bossm.id }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["id"], room["id"]);
    assert_eq!(again["display_name"], "Bossm");

    let mut bossm_ws = server.connect(&bossm).await;
    let mut buboy_ws = server.connect(&buboy).await;

    // Jam authenticates with Identify instead of a query token.
    let (mut jam_ws, _) = tokio_tungstenite::connect_async(server.ws_url.clone())
        .await
        .unwrap();
    send(&mut jam_ws, json!({ "type": "Identify", "data": { "token": jam.token } })).await;
    assert!(matches!(
        next_event(&mut jam_ws).await,
        Some(ServerEvent::ConnectionEstablished { user_id, .. }) if user_id == jam.id
    ));

    assert!(matches!(
        join(&mut bossm_ws, room_id).await,
        ServerEvent::RoomJoined { room_id: r, .. } if r == room_id
    ));
    assert!(matches!(
        join(&mut jam_ws, room_id).await,
        ServerEvent::RoomJoined { room_id: r, .. } if r == room_id
    ));
    assert!(matches!(
        next_event(&mut bossm_ws).await,
        Some(ServerEvent::StatusUpdate { status: MemberStatus::Joined, user_id, .. }) if user_id == jam.id
    ));

    match join(&mut buboy_ws, room_id).await {
        ServerEvent::Error { kind, room_id: r, .. } => {
            assert_eq!(kind, ErrorKind::Forbidden);
            assert_eq!(r, Some(room_id));
        }
        other => panic!("expected a rejection, got {:?}", other),
    }

    send(
        &mut jam_ws,
        json!({ "type": "Send", "data": { "room_id": room_id, "content": "hello" } }),
    )
    .await;

    match next_event(&mut bossm_ws).await {
        Some(ServerEvent::NewMessage {
            content,
            sender_name,
            ..
        }) => {
            assert_eq!(content, "hello");
            assert_eq!(sender_name, "Jam");
        }
        other => panic!("expected the message, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut bossm_ws).await,
        Some(ServerEvent::NewNotification { summary, .. }) if summary == "hello"
    ));
    assert!(matches!(
        next_event(&mut jam_ws).await,
        Some(ServerEvent::NewMessage { content, .. }) if content == "hello"
    ));
    assert!(next_event(&mut buboy_ws).await.is_none());

    // Buboy cannot post over REST either, and nothing was stored for the attempt.
    let denied = server
        .post(&buboy, &format!("/rooms/{}/messages", room_id), json!({ "content": "hi" }))
        .await;
    assert_eq!(denied.status(), 403);

    let history: Vec<Value> = server
        .get(&bossm, &format!("/rooms/{}/messages", room_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["content"], "hello");

    let outsider = server
        .get(&buboy, &format!("/rooms/{}/messages", room_id))
        .await;
    assert_eq!(outsider.status(), 403);

    let hits: Vec<Value> = server
        .get(&bossm, "/search?q=HELLO")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["sender_name"], "Jam");
    let none: Vec<Value> = server
        .get(&buboy, "/search?q=hello")
        .await
        .json()
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn rest_sends_fan_out_to_live_subscribers() {
    let server = start_test_server().await;
    let bossm = server.register("Bossm").await;
    let jam = server.register("Jam").await;
    let buboy = server.register("Buboy").await;

    let mut buboy_ws = server.connect(&buboy).await;

    let resp = server
        .post(
            &bossm,
            "/rooms/group",
            json!({ "name": "barkada", "member_ids": [jam.id, buboy.id] }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let room: Value = resp.json().await.unwrap();
    let room_id: Uuid = room["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(room["members"].as_array().unwrap().len(), 3);

    assert!(matches!(
        next_event(&mut buboy_ws).await,
        Some(ServerEvent::RoomAdded { room_id: r, display_name, .. })
            if r == room_id && display_name == "barkada"
    ));
    assert!(matches!(
        join(&mut buboy_ws, room_id).await,
        ServerEvent::RoomJoined { .. }
    ));

    let sent = server
        .post(
            &bossm,
            &format!("/rooms/{}/messages", room_id),
            json!({ "content": "kain tayo" }),
        )
        .await;
    assert_eq!(sent.status(), 201);

    assert!(matches!(
        next_event(&mut buboy_ws).await,
        Some(ServerEvent::NewMessage { content, .. }) if content == "kain tayo"
    ));

    let empty = server
        .post(&bossm, &format!("/rooms/{}/messages", room_id), json!({ "content": "  " }))
        .await;
    assert_eq!(empty.status(), 400);
}

#[tokio::test]
async fn attachments_are_stored_and_served() {
    let server = start_test_server().await;
    let bossm = server.register("Bossm").await;

    let resp = server
        .client
        .post(format!("{}/attachments?name=notes.txt", server.base_url))
        .bearer_auth(&bossm.token)
        .body("meeting at 5")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message_type"], "file");
    assert_eq!(body["original_name"], "notes.txt");

    let path = body["path"].as_str().unwrap();
    let served = server
        .client
        .get(format!("{}{}", server.base_url, path))
        .send()
        .await
        .unwrap();
    assert_eq!(served.status(), 200);
    assert_eq!(served.text().await.unwrap(), "meeting at 5");

    let rejected = server
        .client
        .post(format!("{}/attachments?name=setup.exe", server.base_url))
        .bearer_auth(&bossm.token)
        .body("MZ")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);
}
