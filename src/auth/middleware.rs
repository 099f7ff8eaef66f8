use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    RequestPartsExt, TypedHeader,
};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use super::jwt::validate_token;

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Authentication middleware to protect routes
pub async fn auth_middleware<B>(req: Request<B>, next: Next<B>) -> Result<Response, Response> {
    let (mut parts, body) = req.into_parts();

    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|e| {
            error!("Authorization header extraction failed: {:?}", e);
            unauthorized("Missing or invalid Authorization header. Please provide a Bearer token")
        })?;

    let claims = validate_token(bearer.token()).map_err(|e| {
        error!("Token validation failed: {}", e);
        unauthorized("Invalid token. Please login again")
    })?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| {
        error!("User ID parsing failed: {:?}", e);
        unauthorized("Invalid user identifier in token")
    })?;

    debug!("User authenticated: {}", user_id);

    parts.extensions.insert(AuthUser {
        user_id,
        email: claims.email,
    });

    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

/// Extractor for authenticated user
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| unauthorized("Authentication required"))
    }
}
