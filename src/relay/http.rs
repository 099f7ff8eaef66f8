use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use tracing::{debug, error, info};

use super::{parse_ticket, PushRelay, PushTicket, RelayError, RelayMessage};

/// Push relay reached over its JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPushRelay {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpPushRelay {
    pub fn new(endpoint: String, access_token: Option<String>) -> Result<Self, RelayError> {
        // gzip is negotiated by the client itself
        let client = Client::builder().gzip(true).build()?;

        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }
}

#[async_trait]
impl PushRelay for HttpPushRelay {
    async fn send(&self, message: &RelayMessage) -> Result<PushTicket, RelayError> {
        info!("Sending push notification to {}", message.to);
        debug!("Relay message: {:?}", message);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(message);

        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!("Push relay request failed: {}", e);
            RelayError::HttpError(e)
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("Relay response ({}): {}", status, body);

        parse_ticket(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::NotificationPayload;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use std::net::SocketAddr;
    use uuid::Uuid;

    // Serve a stub relay on an ephemeral port and return its endpoint
    async fn stub_relay(app: Router) -> String {
        let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
            .serve(app.into_make_service());
        let addr = server.local_addr();
        tokio::spawn(server);
        format!("http://{}/push/send", addr)
    }

    fn message() -> RelayMessage {
        let payload = NotificationPayload::message(Uuid::new_v4(), "alice", "Hi", "Hello");
        RelayMessage::notification("ExponentPushToken[b]", &payload).unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_message_with_bearer_token() {
        let app = Router::new().route(
            "/push/send",
            post(
                |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    let authorized = headers
                        .get("authorization")
                        .map(|value| value == "Bearer relay-token")
                        .unwrap_or(false);
                    if !authorized || body["to"] != "ExponentPushToken[b]" {
                        return (StatusCode::BAD_REQUEST, "unexpected request").into_response();
                    }
                    Json(serde_json::json!({ "data": { "status": "ok", "id": "ticket-1" } }))
                        .into_response()
                },
            ),
        );
        let endpoint = stub_relay(app).await;

        let relay = HttpPushRelay::new(endpoint, Some("relay-token".to_string())).unwrap();
        let ticket = relay.send(&message()).await.unwrap();
        assert_eq!(ticket.id.as_deref(), Some("ticket-1"));
    }

    #[tokio::test]
    async fn test_send_surfaces_relay_status() {
        let app = Router::new().route(
            "/push/send",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let endpoint = stub_relay(app).await;

        let relay = HttpPushRelay::new(endpoint, None).unwrap();
        match relay.send(&message()).await {
            Err(RelayError::StatusError { status, .. }) => assert_eq!(status, 429),
            other => panic!("Expected StatusError, got {:?}", other),
        }
    }
}
