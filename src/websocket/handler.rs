use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::{
    broadcaster::Broadcaster,
    messages::{ClientMessage, WsMessage},
};

/// WebSocket connection state
pub struct WsState {
    pub broadcaster: Broadcaster,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection loop: control messages in, topic traffic and heartbeats out
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscriptions: Vec<(String, tokio::sync::broadcast::Receiver<WsMessage>)> = Vec::new();
    let mut heartbeat = interval(Duration::from_secs(30));

    info!("WebSocket client connected");

    loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscriptions, &mut sender, &state).await {
                            error!("Error handling client message: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Drain broadcast traffic for every subscribed topic
            _ = async {
                for (_, rx) in &mut subscriptions {
                    if let Ok(ws_msg) = rx.try_recv() {
                        if let Ok(json) = serde_json::to_string(&ws_msg) {
                            if sender.send(Message::Text(json)).await.is_err() {
                                return Err(());
                            }
                        }
                    }
                }
                Ok::<(), ()>(())
            } => {}

            _ = heartbeat.tick() => {
                let heartbeat_msg = WsMessage::Ping { timestamp: chrono::Utc::now() };
                if let Ok(json) = serde_json::to_string(&heartbeat_msg) {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn handle_client_message(
    text: &str,
    subscriptions: &mut Vec<(String, tokio::sync::broadcast::Receiver<WsMessage>)>,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    state: &Arc<WsState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client_msg: ClientMessage = serde_json::from_str(text)?;

    match client_msg {
        ClientMessage::Subscribe { topic } => {
            let rx = state.broadcaster.subscribe(&topic);
            subscriptions.push((topic.clone(), rx));

            let response = WsMessage::Subscribed { topic: topic.clone() };
            let json = serde_json::to_string(&response)?;
            sender.send(Message::Text(json)).await?;

            info!("Client subscribed to: {}", topic);
        }
        ClientMessage::Unsubscribe { topic } => {
            subscriptions.retain(|(t, _)| t != &topic);

            let response = WsMessage::Unsubscribed { topic: topic.clone() };
            let json = serde_json::to_string(&response)?;
            sender.send(Message::Text(json)).await?;

            info!("Client unsubscribed from: {}", topic);
        }
        ClientMessage::Ping => {
            let response = WsMessage::Pong { timestamp: chrono::Utc::now() };
            let json = serde_json::to_string(&response)?;
            sender.send(Message::Text(json)).await?;
        }
    }

    Ok(())
}
