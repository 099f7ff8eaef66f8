use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TOKEN_LIFETIME_HOURS: i64 = 24;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // Subject (user ID)
    pub email: String, // Shown to recipients as the sender name
    pub exp: usize,    // Expiration time
    pub iat: usize,    // Issued at
}

/// Generate a JWT token for a user
pub fn generate_token(user_id: &Uuid, email: &str) -> Result<String, JwtError> {
    let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)?;

    let now = Utc::now();
    let expiry = now + Duration::hours(TOKEN_LIFETIME_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|_| JwtError::TokenCreation)
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str) -> Result<Claims, JwtError> {
    let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)?;

    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| JwtError::InvalidToken)?;

    Ok(token_data.claims)
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT secret is missing or not set")]
    MissingSecret,
    #[error("Failed to create JWT token")]
    TokenCreation,
    #[error("Invalid or expired JWT token")]
    InvalidToken,
}
