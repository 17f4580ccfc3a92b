use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(RefreshToken, "refresh_token", {
    user_id: String,
    token: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    expires_at: DateTime<Utc>
});

impl RefreshToken {
    pub fn new(user_id: String, token: String, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            token,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub async fn store(
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let record = Self::new(user_id.to_owned(), token.to_owned(), expires_at);
        db.store_item(record)
            .await?
            .ok_or_else(|| AppError::InternalError("Refresh token failed to store".into()))
    }

    pub async fn find_by_token(
        token: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let record: Option<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE token = $refresh_token LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("refresh_token", token.to_owned()))
            .await?
            .take(0)?;

        Ok(record)
    }

    /// Removes the stored token and returns it when it existed.
    pub async fn revoke(token: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let Some(record) = Self::find_by_token(token, db).await? else {
            return Ok(None);
        };

        Ok(db.delete_item::<Self>(&record.id).await?)
    }

    pub async fn revoke_all_for_user(user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE user_id = $user_id")
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn purge_expired(db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE expires_at <= time::now()")
            .bind(("table", Self::table_name()))
            .await?
            .check()?;

        Ok(())
    }
}
