use crate::auth::middleware::AuthUser;
use crate::notification::model::{
    BroadcastOutcome, BroadcastRequest, BroadcastResponse, FanOutReport, InboxResponse,
    NotificationError, NotificationErrorResponse, RegisterDeviceRequest, RegisterDeviceResponse,
    UnreadCountResponse,
};
use crate::notification::service::{DeviceRegistration, NotificationService};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::info;

// Helper function to convert NotificationError to HTTP response
fn notification_error_to_response(
    err: NotificationError,
) -> (StatusCode, Json<NotificationErrorResponse>) {
    let (status, error_message, code) = match err {
        NotificationError::ValidationError(msg) => {
            (StatusCode::BAD_REQUEST, msg, "VALIDATION_ERROR")
        }
        NotificationError::InvalidAddress(msg) => (StatusCode::BAD_REQUEST, msg, "INVALID_ADDRESS"),
    };

    (
        status,
        Json(NotificationErrorResponse {
            error: error_message,
            code: code.to_string(),
        }),
    )
}

/// Register the caller's device for push delivery
///
/// Web clients get a synthesized address. A native client that sends no
/// address (permission declined) is accepted but not registered.
#[utoipa::path(
    post,
    path = "/api/devices",
    tag = "notifications",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 200, description = "Registration processed", body = RegisterDeviceResponse),
        (status = 400, description = "Address does not match platform", body = NotificationErrorResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn register_device(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
    Json(req): Json<RegisterDeviceRequest>,
) -> impl IntoResponse {
    info!(
        "Device registration for user {} on {}",
        user.user_id,
        req.platform.as_str()
    );

    let registration = DeviceRegistration {
        platform: req.platform,
        address: req.address,
        device_name: req.device_name,
    };

    match service.register_device(user.user_id, registration).await {
        Ok(Some(token)) => (
            StatusCode::OK,
            Json(RegisterDeviceResponse {
                registered: true,
                address: Some(token.address),
                platform: Some(token.platform),
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::OK,
            Json(RegisterDeviceResponse {
                registered: false,
                address: None,
                platform: None,
            }),
        )
            .into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Send a message to every other registered user
#[utoipa::path(
    post,
    path = "/api/notifications",
    tag = "notifications",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Fan-out finished", body = BroadcastResponse),
        (status = 400, description = "Empty title or body", body = NotificationErrorResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_notification(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
    Json(req): Json<BroadcastRequest>,
) -> Result<(StatusCode, Json<BroadcastResponse>), (StatusCode, Json<NotificationErrorResponse>)> {
    info!("Broadcast requested by user {}", user.user_id);

    let outcome = service
        .broadcast(user.user_id, &user.email, &req.title, &req.body)
        .await
        .map_err(notification_error_to_response)?;

    let response = match outcome {
        BroadcastOutcome::NoRecipients => BroadcastResponse {
            status: "no_recipients".to_string(),
            clear_input: false,
            report: FanOutReport::default(),
        },
        BroadcastOutcome::Sent(report) => BroadcastResponse {
            status: "sent".to_string(),
            clear_input: report.delivered > 0,
            report,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Current unread count of the caller
#[utoipa::path(
    get,
    path = "/api/notifications/unread",
    tag = "notifications",
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_unread_count(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    let counter = service.unread_count(user.user_id).await;
    (
        StatusCode::OK,
        Json(UnreadCountResponse {
            unread_count: counter.unread_count,
            last_updated: counter.last_updated,
        }),
    )
}

/// Open the inbox and list this session's messages
#[utoipa::path(
    get,
    path = "/api/inbox",
    tag = "inbox",
    responses(
        (status = 200, description = "Inbox contents, newest first", body = InboxResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn open_inbox(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    let counter = service.unread_count(user.user_id).await;
    let entries = service.open_inbox(user.user_id);

    (
        StatusCode::OK,
        Json(InboxResponse {
            unread_count: counter.unread_count,
            entries,
        }),
    )
}

/// Close the inbox, resetting the unread count and badge
#[utoipa::path(
    post,
    path = "/api/inbox/close",
    tag = "inbox",
    responses(
        (status = 204, description = "Unread count reset"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn close_inbox(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    service.close_inbox(user.user_id).await;
    StatusCode::NO_CONTENT
}

/// Drop every message from this session's inbox
#[utoipa::path(
    delete,
    path = "/api/inbox",
    tag = "inbox",
    responses(
        (status = 204, description = "Inbox cleared"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn clear_inbox(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    service.clear_inbox(user.user_id);
    StatusCode::NO_CONTENT
}

/// Sign out, closing every live notification stream of the caller
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "authentication",
    responses(
        (status = 204, description = "Signed out"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    info!("User {} signing out", user.user_id);
    service.sign_out(user.user_id).await;
    StatusCode::NO_CONTENT
}
