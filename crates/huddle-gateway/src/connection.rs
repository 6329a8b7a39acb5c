use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::error::ChatError;
use huddle_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::identity::{Identity, TokenVerifier};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle one WebSocket. `identity` is set when the token was already checked
/// at the HTTP upgrade; otherwise the client must send `Identify` first.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    verifier: TokenVerifier,
    identity: Option<Identity>,
) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match identity {
        Some(identity) => identity,
        None => match wait_for_identify(&mut sender, &mut receiver, &verifier).await {
            Some(identity) => identity,
            None => {
                warn!("WebSocket client failed to identify, closing");
                let _ = sender.close().await;
                return;
            }
        },
    };

    run_connection_loop(sender, receiver, dispatcher, identity).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    identity: Identity,
) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(dispatcher.outbound_queue());
    let closed = dispatcher.handle_connect(conn_id, identity.clone(), tx.clone());

    info!(
        "{} ({}) connected to gateway as {} ({} live)",
        identity.username,
        identity.user_id,
        conn_id,
        dispatcher.registry().connection_count()
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let send_closed = closed.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = send_closed.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let username_recv = identity.username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let text = text.as_str();
                    match serde_json::from_str::<ClientCommand>(text) {
                        Ok(cmd) => {
                            let room_id = cmd.room_id();
                            if let Err(e) = dispatcher_recv.handle_command(conn_id, cmd).await {
                                debug!("{} ({}) command rejected: {}", username_recv, conn_id, e);
                                let _ = tx.try_send(ServerEvent::error(&e, room_id));
                            }
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                username_recv,
                                conn_id,
                                e,
                                truncate(text, 200)
                            );
                            let err = ChatError::invalid(format!("malformed command: {}", e));
                            let _ = tx.try_send(ServerEvent::error(&err, None));
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.handle_disconnect(conn_id);
    info!(
        "{} ({}) disconnected from gateway ({})",
        identity.username, identity.user_id, conn_id
    );
}

/// Waits for a valid `Identify`. Anything else is answered with an
/// `Unauthenticated` error and the wait continues until the timeout.
async fn wait_for_identify(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    verifier: &TokenVerifier,
) -> Option<Identity> {
    let wait = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };

            let room_id = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                Ok(ClientCommand::Identify { token }) => {
                    if let Some(identity) = verifier.verify(&token) {
                        return Some(identity);
                    }
                    None
                }
                Ok(cmd) => cmd.room_id(),
                Err(_) => None,
            };

            let rejection = ServerEvent::error(&ChatError::Unauthenticated, room_id);
            if let Some(frame) = encode(&rejection) {
                if sender.send(frame).await.is_err() {
                    return None;
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, wait)
        .await
        .ok()
        .flatten()
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to serialize {:?}: {}", event, e);
            None
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }

    #[test]
    fn events_encode_as_text_frames() {
        let frame = encode(&ServerEvent::RoomLeft {
            room_id: Uuid::nil(),
        })
        .unwrap();
        match frame {
            Message::Text(text) => assert!(text.as_str().contains("\"RoomLeft\"")),
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
