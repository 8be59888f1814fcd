//! services/api/src/web/ws_handler.rs
//!
//! The live view of one conversation. On connect the caller's unread messages are
//! marked read once, then every change to the conversation is pushed as a full
//! snapshot until the socket closes.

use crate::{
    error::{ApiError, Rejection},
    web::{
        chat::{authorize_counterpart, MessageView},
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use school_sync_core::domain::Identity;
use school_sync_core::{ConversationKey, MessageFeed, MessageLinks};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to a conversation WebSocket.
///
/// The counterpart is checked before the upgrade, so strangers get a plain 403.
pub async fn conversation_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(email): Path<String>,
) -> Result<Response, Rejection> {
    let (key, links) = authorize_counterpart(&app_state, &identity, &email).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, identity, key, links)))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    identity: Identity,
    key: ConversationKey,
    links: MessageLinks,
) {
    info!("User {} opened conversation {}", identity.user_id, key);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Focus: mark read once, then subscribe ---
    if let Err(e) = app_state.chat.mark_read(&key, &identity.email).await {
        error!("Failed to mark {} read on open: {:?}", key, e);
    }

    let feed = match app_state.chat.subscribe(&key).await {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to subscribe to {}: {:?}", key, e);
            let frame = ServerMessage::Error {
                message: "Failed to load the conversation.".to_string(),
            };
            let _ = send_frame(&ws_sender, &frame).await;
            return;
        }
    };

    let token = CancellationToken::new();
    let forward_task = tokio::spawn(forward_snapshots(
        feed,
        ws_sender.clone(),
        identity.email.clone(),
        token.clone(),
    ));

    // --- 2. Main Message Loop ---
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_text_message(text.as_str(), &app_state, &identity, &key, links, &ws_sender)
                    .await;
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", key, e);
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    // Stopping the forwarder drops the feed, which ends the subscription.
    token.cancel();
    if let Err(e) = forward_task.await {
        error!("Snapshot task for {} failed: {:?}", key, e);
    }
    info!("User {} left conversation {}", identity.user_id, key);
}

/// Pushes every update of the feed to the client until cancelled.
async fn forward_snapshots(
    mut feed: MessageFeed,
    ws_sender: WsSender,
    own_email: String,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            update = feed.next() => match update {
                Some(Ok(messages)) => {
                    let frame = ServerMessage::Snapshot {
                        messages: messages
                            .into_iter()
                            .map(|m| MessageView::new(m, &own_email))
                            .collect(),
                    };
                    if send_frame(&ws_sender, &frame).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Conversation feed failed: {:?}", e);
                    let frame = ServerMessage::Error {
                        message: "Live updates stopped.".to_string(),
                    };
                    let _ = send_frame(&ws_sender, &frame).await;
                    break;
                }
                None => break,
            }
        }
    }
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &AppState,
    identity: &Identity,
    key: &ConversationKey,
    links: MessageLinks,
    ws_sender: &WsSender,
) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Send { text }) => {
            match app_state.chat.send(key, &identity.email, &text, links).await {
                Ok(message) => ServerMessage::Sent { id: message.id },
                Err(e) => {
                    warn!("Failed to send message on {}: {:?}", key, e);
                    ServerMessage::Error {
                        message: "The message could not be sent.".to_string(),
                    }
                }
            }
        }
        Ok(ClientMessage::MarkRead) => match app_state.chat.mark_read(key, &identity.email).await {
            Ok(count) => ServerMessage::MarkedRead { count },
            Err(e) => {
                error!("Failed to mark {} read: {:?}", key, e);
                ServerMessage::Error {
                    message: "Failed to mark messages read.".to_string(),
                }
            }
        },
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            ServerMessage::Error {
                message: "Unknown message.".to_string(),
            }
        }
    };

    if let Err(e) = send_frame(ws_sender, &reply).await {
        warn!("Failed to answer client on {}: {}", key, e);
    }
}

async fn send_frame(ws_sender: &WsSender, frame: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(frame).map_err(|e| ApiError::Internal(e.to_string()))?;
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await?;
    Ok(())
}
