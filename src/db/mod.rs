use sqlx::{Executor, PgPool, Row};
use tracing::{error, info};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Initialize the database schema
pub async fn init_db(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Initializing database schema...");

    // Several statements, so run it through the simple query protocol
    match pool.execute(SCHEMA_SQL).await {
        Ok(_) => {
            info!("Database schema initialized successfully");
            Ok(())
        }
        Err(e) => {
            error!("Failed to initialize database schema: {}", e);
            Err(e)
        }
    }
}

/// Check if both tables exist
pub async fn check_db_initialized(pool: &PgPool) -> bool {
    let result = sqlx::query(
        "SELECT COUNT(*) = 2 FROM information_schema.tables WHERE table_name IN ('users', 'user_tokens')",
    )
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => row.try_get::<bool, _>(0).unwrap_or(false),
        Err(_) => false,
    }
}
