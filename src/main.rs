mod api_doc;
mod auth;
mod config;
mod db;
mod notification;
mod relay;
mod routes;
mod schema_ext;
mod store;
mod websocket;

use axum::{routing::get, Router};
use dotenv::dotenv;
use redis::Client;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::config::{AppConfig, PORT_ATTEMPTS};
use crate::notification::inbox::Inbox;
use crate::notification::service::NotificationService;
use crate::relay::HttpPushRelay;
use crate::store::memory::{MemoryCounterStore, MemorySessionBus};
use crate::store::postgres::PgTokenStore;
use crate::store::redis::{RedisCounterStore, RedisSessionBus};
use crate::store::{CounterStore, SessionBus};

type LiveBackends = (Arc<dyn CounterStore>, Arc<dyn SessionBus>);

fn memory_backends() -> LiveBackends {
    (
        Arc::new(MemoryCounterStore::new()),
        Arc::new(MemorySessionBus::new()),
    )
}

/// Counter store and session bus, shared through Redis when configured
fn live_backends(redis_url: Option<&str>) -> LiveBackends {
    let Some(url) = redis_url else {
        warn!("No Redis URL configured, unread counts and sessions stay in this process");
        return memory_backends();
    };

    info!("Initializing Redis backends with URL: {}", url);
    match Client::open(url) {
        Ok(client) => (
            Arc::new(RedisCounterStore::new(client.clone())),
            Arc::new(RedisSessionBus::new(client)),
        ),
        Err(e) => {
            error!("Failed to open Redis client, using memory backends: {}", e);
            memory_backends()
        }
    }
}

fn app(pool: sqlx::PgPool, service: Arc<NotificationService>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::routes(pool.clone()))
        .merge(routes::auth::routes(pool))
        .merge(routes::notifications::routes(service))
        .route("/", get(|| async { "Welcome to Broadcast Notify Backend API" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    if !db::check_db_initialized(&pool).await {
        db::init_db(&pool).await?;
    }

    let (counters, sessions) = live_backends(config.redis_url.as_deref());
    let relay = HttpPushRelay::new(config.relay_url.clone(), config.relay_access_token.clone())?;
    info!("Push relay endpoint: {}", config.relay_url);

    let notification_service = Arc::new(NotificationService::new(
        Arc::new(PgTokenStore::new(pool.clone())),
        counters,
        sessions,
        Arc::new(relay),
        Inbox::new(config.inbox_capacity),
    ));

    let app = app(pool, notification_service);

    // Try different ports
    let mut port = config.port;
    for attempt in 1..=PORT_ATTEMPTS {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match axum::Server::try_bind(&addr) {
            Ok(server) => {
                info!("Server started at http://localhost:{}", port);
                info!("API Documentation: http://localhost:{}/docs", port);
                info!(
                    "WebSocket Notifications API: ws://localhost:{}/api/notifications/ws?token=<JWT>",
                    port
                );
                return server
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| e.into());
            }
            Err(e) => {
                warn!("Port {} unavailable: {}", port, e);
                if attempt == PORT_ATTEMPTS {
                    break;
                }
                port += 1;
            }
        }
    }

    Err("Failed to bind to any port".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_token;
    use crate::notification::model::{Platform, UserToken};
    use crate::relay::{MockPushRelay, PushTicket, RelayError};
    use crate::store::memory::MemoryTokenStore;
    use axum::{
        body::{Body, HttpBody},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_app_with(tokens: Vec<UserToken>, relay: MockPushRelay) -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let (counters, sessions) = memory_backends();
        let service = Arc::new(NotificationService::new(
            Arc::new(MemoryTokenStore::with_tokens(tokens)),
            counters,
            sessions,
            Arc::new(relay),
            Inbox::default(),
        ));
        app(pool, service)
    }

    fn test_app() -> Router {
        test_app_with(vec![], MockPushRelay::new())
    }

    fn native_token(address: &str) -> UserToken {
        UserToken {
            user_id: Uuid::new_v4(),
            address: address.to_string(),
            platform: Platform::Native,
            device_name: None,
            updated_at: Utc::now(),
        }
    }

    fn broadcast_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/notifications")
            .header(header::AUTHORIZATION, bearer())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let mut body = response.into_body();
        let mut bytes = Vec::new();
        while let Some(chunk) = body.data().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        serde_json::from_slice(&bytes).unwrap()
    }

    fn bearer() -> String {
        std::env::set_var("JWT_SECRET", "test_secret");
        let token = generate_token(&Uuid::new_v4(), "alice@example.com").unwrap();
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn test_notification_routes_require_auth() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"Hi","body":"Hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_blank_broadcast_rejected() {
        let response = test_app()
            .oneshot(broadcast_request(r#"{"title":"  ","body":"Hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_broadcast_without_recipients_keeps_input() {
        let response = test_app()
            .oneshot(broadcast_request(r#"{"title":"Hi","body":"Hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "no_recipients");
        assert_eq!(json["clear_input"], false);
        assert_eq!(json["report"]["attempted"], 0);
    }

    #[tokio::test]
    async fn test_broadcast_with_only_failures_keeps_input() {
        let mut relay = MockPushRelay::new();
        relay.expect_send().times(1).returning(|message| {
            Err(RelayError::Rejected(format!(
                "\"{}\" is not a registered push notification recipient",
                message.to
            )))
        });
        let app = test_app_with(vec![native_token("ExponentPushToken[bob-secret]")], relay);

        let response = app
            .oneshot(broadcast_request(r#"{"title":"Hi","body":"Hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "sent");
        assert_eq!(json["clear_input"], false);
        assert_eq!(json["report"]["delivered"], 0);
        assert_eq!(
            json["report"]["failures"],
            serde_json::json!([{ "channel": "relay", "code": "rejected" }])
        );
        assert!(!json.to_string().contains("bob-secret"));
    }

    #[tokio::test]
    async fn test_broadcast_with_one_success_clears_input() {
        let mut relay = MockPushRelay::new();
        relay
            .expect_send()
            .withf(|message| message.to == "ExponentPushToken[bob]")
            .times(1)
            .returning(|_| {
                Ok(PushTicket {
                    status: "ok".to_string(),
                    id: Some("ticket".to_string()),
                    message: None,
                    details: None,
                })
            });
        relay
            .expect_send()
            .withf(|message| message.to == "ExponentPushToken[carol]")
            .times(1)
            .returning(|_| {
                Err(RelayError::StatusError {
                    status: 500,
                    body: String::new(),
                })
            });
        let app = test_app_with(
            vec![
                native_token("ExponentPushToken[bob]"),
                native_token("ExponentPushToken[carol]"),
            ],
            relay,
        );

        let response = app
            .oneshot(broadcast_request(r#"{"title":"Hi","body":"Hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "sent");
        assert_eq!(json["clear_input"], true);
        assert_eq!(json["report"]["attempted"], 2);
        assert_eq!(json["report"]["delivered"], 1);
    }

    #[tokio::test]
    async fn test_unread_count_defaults_to_zero() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/notifications/unread")
                    .header(header::AUTHORIZATION, bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_close_inbox_returns_no_content() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/inbox/close")
                    .header(header::AUTHORIZATION, bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_native_address_with_web_prefix_rejected() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/devices")
                    .header(header::AUTHORIZATION, bearer())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"platform":"native","address":"web-123"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
