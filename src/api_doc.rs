use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Security scheme configuration for OpenAPI
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// API documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Broadcast Notify Backend API",
        version = "0.1.0",
        description = "Push notification fan-out and unread count synchronization"
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::health::protected_health_check,
        crate::auth::controller::login,
        crate::auth::controller::register,
        crate::notification::controller::logout,
        crate::notification::controller::register_device,
        crate::notification::controller::send_notification,
        crate::notification::controller::get_unread_count,
        crate::notification::controller::open_inbox,
        crate::notification::controller::close_inbox,
        crate::notification::controller::clear_inbox
    ),
    components(
        schemas(
            // Auth schemas
            crate::auth::controller::RegisterRequest,
            crate::auth::controller::LoginRequest,
            crate::auth::controller::AuthResponse,
            crate::auth::controller::ErrorResponse,
            // Health schemas
            crate::routes::health::HealthResponse,
            // Notification schemas
            crate::notification::model::Platform,
            crate::notification::model::RegisterDeviceRequest,
            crate::notification::model::RegisterDeviceResponse,
            crate::notification::model::BroadcastRequest,
            crate::notification::model::BroadcastResponse,
            crate::notification::model::FanOutReport,
            crate::notification::model::DeliveryFailure,
            crate::notification::model::FailureCode,
            crate::notification::model::UnreadCountResponse,
            crate::notification::model::InboxEntry,
            crate::notification::model::InboxResponse,
            crate::notification::model::NotificationErrorResponse,
            // External type schemas
            crate::schema_ext::DateTimeWrapper,
            crate::schema_ext::UuidWrapper
        )
    ),
    tags(
        (name = "authentication", description = "Authentication endpoints"),
        (name = "health", description = "Health check endpoints"),
        (name = "notifications", description = "Device registration, fan-out and unread count"),
        (name = "inbox", description = "Session inbox endpoints")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;
