use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::ws::{Message, WebSocket};

use crate::lobby::BattleLobby;
use battle_types::{ClientMessage, ServerMessage};

pub mod connection;
pub mod handlers;
pub mod rate_limiter;

use connection::ConnectionId;
pub use connection::ConnectionManager;
use handlers::MessageHandler;
use rate_limiter::RateLimiter;

pub async fn handle_connection(
    websocket: WebSocket,
    connection_manager: Arc<ConnectionManager>,
    lobby: Arc<BattleLobby>,
    rate_limiter: RateLimiter,
) {
    let connection_id = ConnectionId::new();
    info!("New WebSocket connection: {}", connection_id);

    let (mut ws_sender, mut ws_receiver) = websocket.split();

    // Create connection and get receiver for outgoing messages
    let message_receiver = connection_manager.create_connection(connection_id).await;

    let message_handler =
        MessageHandler::new(connection_id, connection_manager.clone(), lobby.clone());

    // Handle incoming messages
    let incoming_handler = {
        let message_handler = message_handler.clone();
        let connection_manager = connection_manager.clone();
        let mut rate_limiter = rate_limiter;

        async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(msg) => {
                        if msg.is_close() {
                            break;
                        }
                        if !rate_limiter.check_rate_limit() {
                            warn!("Rate limit exceeded for connection {}", connection_id);
                            let _ = connection_manager
                                .send_to_connection(
                                    connection_id,
                                    ServerMessage::Error {
                                        message: "Rate limit exceeded".to_string(),
                                    },
                                )
                                .await;
                            continue;
                        }
                        if let Err(e) = handle_message(msg, &message_handler).await {
                            error!("Error handling message for {}: {}", connection_id, e);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                }
            }
        }
    };

    // Handle outgoing messages
    let outgoing_handler = {
        async move {
            let mut receiver = message_receiver;

            while let Some(message) = receiver.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {:?}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::text(json)).await {
                    warn!("Failed to send message to {}: {:?}", connection_id, e);
                    break;
                }
            }
        }
    };

    // Run both handlers concurrently
    tokio::select! {
        _ = incoming_handler => {},
        _ = outgoing_handler => {},
    }

    // Cleanup connection
    info!("Connection {} disconnected", connection_id);
    message_handler.handle_disconnect().await;
    connection_manager.remove_connection(connection_id).await;
}

/// Parse and dispatch one frame. Malformed frames are answered, not fatal.
async fn handle_message(
    msg: Message,
    message_handler: &MessageHandler,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Only handle text messages
    if !msg.is_text() {
        return Ok(());
    }

    let text = msg.to_str().map_err(|_| "Invalid text message")?;

    let client_message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            message_handler
                .send_error(&format!("Invalid JSON message: {}", e))
                .await?;
            return Ok(());
        }
    };

    message_handler
        .handle_message(client_message)
        .await
        .map_err(|e| format!("Message handling error: {}", e))?;

    Ok(())
}
