use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

use crate::auth::middleware::auth_middleware;
use crate::notification::controller;
use crate::notification::service::NotificationService;
use crate::websocket::notifications::ws_handler;

pub fn routes(service: Arc<NotificationService>) -> Router {
    // The socket authenticates through its query string
    let socket_routes = Router::new()
        .route("/api/notifications/ws", get(ws_handler))
        .with_state(service.clone());

    let private_routes = Router::new()
        .route("/api/devices", post(controller::register_device))
        .route("/api/notifications", post(controller::send_notification))
        .route(
            "/api/notifications/unread",
            get(controller::get_unread_count),
        )
        .route(
            "/api/inbox",
            get(controller::open_inbox).delete(controller::clear_inbox),
        )
        .route("/api/inbox/close", post(controller::close_inbox))
        .route("/api/auth/logout", post(controller::logout))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(service));

    socket_routes.merge(private_routes)
}
