use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::validate_token;
use crate::notification::model::{SessionEvent, UnreadCounter};
use crate::notification::service::NotificationService;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTGOING_BUFFER: usize = 100;
// Upper bound on flushing queued frames once the session ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters for WebSocket connections
#[derive(Debug, Deserialize)]
pub struct WebSocketParams {
    token: Option<String>,
}

/// Unread count frame, sent on connect and after every counter write
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UnreadCountMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub unread_count: i64,
    pub last_updated: DateTime<Utc>,
}

impl From<UnreadCounter> for UnreadCountMessage {
    fn from(counter: UnreadCounter) -> Self {
        Self {
            message_type: "unread_count".to_string(),
            unread_count: counter.unread_count,
            last_updated: counter.last_updated,
        }
    }
}

fn unread_frame(counter: UnreadCounter) -> Result<Message, serde_json::Error> {
    serde_json::to_string(&UnreadCountMessage::from(counter)).map(Message::Text)
}

fn event_frame(event: &SessionEvent) -> Result<Message, serde_json::Error> {
    serde_json::to_string(event).map(Message::Text)
}

/// Queue a frame for the socket. Returns false once the writer is gone.
async fn queue(tx: &mpsc::Sender<Message>, frame: Result<Message, serde_json::Error>) -> bool {
    match frame {
        Ok(message) => tx.send(message).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize WebSocket frame: {}", e);
            true
        }
    }
}

/// Handle an invalid socket connection (authentication failure)
async fn handle_invalid_socket(mut socket: WebSocket, error_message: String) {
    let body = serde_json::json!({ "error": error_message }).to_string();
    if let Err(e) = socket.send(Message::Text(body)).await {
        error!("Error sending error message on WS: {}", e);
    }

    let _ = socket.close().await;
}

/// Handle an authenticated WebSocket connection
async fn handle_valid_connection(
    socket: WebSocket,
    user_id: Uuid,
    service: Arc<NotificationService>,
) {
    let mut unread = match service.subscribe_unread(user_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to subscribe to unread count of {}: {}", user_id, e);
            handle_invalid_socket(socket, "Notification store unavailable".to_string()).await;
            return;
        }
    };
    let mut events = match service.subscribe_events(user_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to subscribe to session events of {}: {}", user_id, e);
            handle_invalid_socket(socket, "Notification store unavailable".to_string()).await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTGOING_BUFFER);

    // Forward queued frames to the WebSocket
    let mut forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                error!("Error forwarding message to WebSocket: {}", e);
                break;
            }
        }
    });

    let tx_heartbeat = tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut interval = time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = tx_heartbeat.send(Message::Ping(vec![])).await {
                error!("Error sending heartbeat: {}", e);
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket closed by client");
                    break;
                }
                Some(Ok(Message::Pong(_))) => debug!("Received pong from client"),
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            counter = unread.next() => match counter {
                Some(counter) => {
                    if !queue(&tx, unread_frame(counter)).await {
                        break;
                    }
                }
                None => {
                    warn!("Unread count stream of {} ended", user_id);
                    break;
                }
            },
            event = events.next() => match event {
                Some(SessionEvent::SignedOut) => {
                    info!("User {} signed out, closing WebSocket", user_id);
                    if queue(&tx, event_frame(&SessionEvent::SignedOut)).await {
                        let _ = tx.send(Message::Close(None)).await;
                    }
                    break;
                }
                Some(event) => {
                    if !queue(&tx, event_frame(&event)).await {
                        break;
                    }
                }
                None => {
                    warn!("Session event stream of {} ended", user_id);
                    break;
                }
            },
        }
    }

    // Release both listeners before draining the socket
    drop(unread);
    drop(events);

    heartbeat_task.abort();
    let _ = heartbeat_task.await;
    drop(tx);
    if time::timeout(FLUSH_TIMEOUT, &mut forward_task).await.is_err() {
        warn!("Timed out flushing WebSocket for user: {}", user_id);
        forward_task.abort();
    }

    info!("WebSocket connection closed for user: {}", user_id);
}

/// Live unread count and session events of the token's user
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketParams>,
    State(service): State<Arc<NotificationService>>,
) -> impl IntoResponse {
    let token = params.token.unwrap_or_default();

    let user_id = match validate_token(&token) {
        Ok(claims) => match Uuid::parse_str(&claims.sub) {
            Ok(uuid) => uuid,
            Err(e) => {
                let error_message = format!("Invalid user ID in token: {}", e);
                return ws.on_upgrade(move |socket| async move {
                    handle_invalid_socket(socket, error_message).await;
                });
            }
        },
        Err(e) => {
            let error_message = format!("Invalid token: {}", e);
            return ws.on_upgrade(move |socket| async move {
                handle_invalid_socket(socket, error_message).await;
            });
        }
    };

    info!("User {} connected to notifications WebSocket", user_id);
    ws.on_upgrade(move |socket| async move {
        handle_valid_connection(socket, user_id, service).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::NotificationPayload;

    fn text(frame: Message) -> serde_json::Value {
        match frame {
            Message::Text(body) => serde_json::from_str(&body).unwrap(),
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_unread_frame_format() {
        let user_id = Uuid::new_v4();
        let counter = UnreadCounter {
            user_id,
            unread_count: 4,
            last_updated: Utc::now(),
        };

        let json = text(unread_frame(counter).unwrap());
        assert_eq!(json["type"], "unread_count");
        assert_eq!(json["unread_count"], 4);
        assert!(json["last_updated"].is_string());
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn test_event_frames() {
        let payload = NotificationPayload::message(Uuid::new_v4(), "alice", "Hi", "Hello");
        let json = text(event_frame(&SessionEvent::Notification { payload }).unwrap());
        assert_eq!(json["type"], "notification");
        assert_eq!(json["payload"]["title"], "Hi");

        let json = text(event_frame(&SessionEvent::SignedOut).unwrap());
        assert_eq!(json, serde_json::json!({ "type": "signed_out" }));
    }

    #[tokio::test]
    async fn test_queue_reports_closed_writer() {
        let (tx, rx) = mpsc::channel::<Message>(1);
        drop(rx);
        assert!(!queue(&tx, event_frame(&SessionEvent::SignedOut)).await);
    }

    #[tokio::test]
    async fn test_queue_forwards_frame() {
        let (tx, mut rx) = mpsc::channel::<Message>(1);
        assert!(queue(&tx, event_frame(&SessionEvent::SignedOut)).await);
        assert!(matches!(rx.recv().await, Some(Message::Text(_))));
    }

    #[test]
    fn test_websocket_params() {
        let params: WebSocketParams = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("abc"));

        let params: WebSocketParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
    }
}
