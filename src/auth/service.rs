use argon2::{
    password_hash::PasswordVerifier,
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use axum::http::StatusCode;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use super::jwt::generate_token;

// Input data structures
pub struct RegisterData {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

pub struct LoginData {
    pub email: String,
    pub password: String,
}

// Result data structure
pub struct AuthResult {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub token: String,
}

// Service errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Failed to generate auth token")]
    TokenError,
    #[error("{0}")]
    InternalError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::DatabaseError(_) | Self::TokenError | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Reject blank credentials before touching the database
pub fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::InvalidInput(
            "Please fill in all fields".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AuthError::InvalidInput("Invalid email address".to_string()));
    }
    Ok(())
}

// User registration service
pub async fn register(pool: &PgPool, data: RegisterData) -> Result<AuthResult, AuthError> {
    validate_credentials(&data.email, &data.password)?;
    let email = data.email.trim().to_lowercase();

    info!("Checking if user with email {} already exists", email);

    let existing_user = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            error!("Database error while checking existing user: {}", e);
            AuthError::DatabaseError(e.to_string())
        })?;

    if existing_user.is_some() {
        info!("User with email {} already exists", email);
        return Err(AuthError::AlreadyExists("Email already in use".to_string()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(data.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            AuthError::InternalError(format!("Password hashing failed: {}", e))
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, display_name, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(&email)
    .bind(&data.display_name)
    .bind(&password_hash)
    .execute(pool)
    .await
    .map_err(|e| {
        error!("Failed to insert new user: {}", e);
        AuthError::DatabaseError(e.to_string())
    })?;

    info!("User created successfully with ID: {}", user_id);

    let token = generate_token(&user_id, &email).map_err(|e| {
        error!("Token generation failed: {}", e);
        AuthError::TokenError
    })?;

    Ok(AuthResult {
        user_id,
        email,
        display_name: data.display_name,
        token,
    })
}

// User login service
pub async fn login(pool: &PgPool, data: LoginData) -> Result<AuthResult, AuthError> {
    validate_credentials(&data.email, &data.password)?;
    let email = data.email.trim().to_lowercase();

    info!("Attempting login for user with email: {}", email);

    let user = sqlx::query_as::<_, (Uuid, String, Option<String>, String)>(
        "SELECT id, email, display_name, password_hash FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!("Database error while fetching user: {}", e);
        AuthError::DatabaseError(e.to_string())
    })?;

    let (user_id, email, display_name, password_hash) = match user {
        Some(user) => user,
        None => {
            info!("No user found with email: {}", email);
            return Err(AuthError::InvalidCredentials);
        }
    };

    let parsed_hash = argon2::password_hash::PasswordHash::new(&password_hash).map_err(|e| {
        error!("Failed to parse password hash: {}", e);
        AuthError::InvalidCredentials
    })?;

    Argon2::default()
        .verify_password(data.password.as_bytes(), &parsed_hash)
        .map_err(|e| {
            info!("Password verification failed: {}", e);
            AuthError::InvalidCredentials
        })?;

    let token = generate_token(&user_id, &email).map_err(|e| {
        error!("Token generation failed: {}", e);
        AuthError::TokenError
    })?;

    info!("Login successful for user ID: {}", user_id);

    Ok(AuthResult {
        user_id,
        email,
        display_name,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_credentials_rejected() {
        assert!(matches!(
            validate_credentials("", "secret"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_credentials("alice@example.com", ""),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_credentials("alice", "secret"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(validate_credentials("alice@example.com", "secret").is_ok());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AuthError::InvalidInput(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::AlreadyExists(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AuthError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::TokenError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::DatabaseError("pool timed out".to_string()).to_string(),
            "Database error: pool timed out"
        );
    }
}
