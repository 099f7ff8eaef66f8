use axum::{routing::post, Router};
use sqlx::PgPool;

use crate::auth::controller::{login, register};

// Public account routes, logout lives with the notification routes
pub fn routes(pool: PgPool) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .with_state(pool)
}
