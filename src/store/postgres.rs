use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::{StoreError, TokenStore};
use crate::notification::model::{Platform, UserToken};

type TokenRow = (Uuid, String, String, Option<String>, DateTime<Utc>);

fn token_from_row(row: TokenRow) -> Option<UserToken> {
    let (user_id, address, platform, device_name, updated_at) = row;
    match Platform::parse(&platform) {
        Some(platform) => Some(UserToken {
            user_id,
            address,
            platform,
            device_name,
            updated_at,
        }),
        None => {
            warn!(
                "Skipping token for user {} with unknown platform tag {}",
                user_id, platform
            );
            None
        }
    }
}

/// Token store backed by the `user_tokens` table.
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn upsert(&self, token: &UserToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, address, platform, device_name, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                address = EXCLUDED.address,
                platform = EXCLUDED.platform,
                device_name = EXCLUDED.device_name,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(token.user_id)
        .bind(&token.address)
        .bind(token.platform.as_str())
        .bind(&token.device_name)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await?;

        info!(
            "Saved {} token for user {}",
            token.platform.as_str(),
            token.user_id
        );
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<UserToken>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT user_id, address, platform, device_name, updated_at FROM user_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(token_from_row))
    }

    async fn list_all(&self) -> Result<Vec<UserToken>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT user_id, address, platform, device_name, updated_at FROM user_tokens",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(token_from_row).collect())
    }
}
