use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::conversation::Conversation;

stored_object!(User, "user", {
    email: String,
    username: String,
    password: String,
    full_name: String,
    avatar_url: Option<String>,
    is_active: bool
});

/// Public view of a user, never carries the password hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

impl User {
    pub async fn create_new(
        email: String,
        username: String,
        password: String,
        full_name: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let email = email.trim().to_lowercase();
        let username = username.trim().to_owned();

        if !email.contains('@') || email.len() < 5 || email.len() > 255 {
            return Err(AppError::Validation("Invalid email address".into()));
        }
        if username.len() < 3 || username.len() > 50 {
            return Err(AppError::Validation(
                "Username must be between 3 and 50 characters".into(),
            ));
        }
        validate_password(&password)?;

        if Self::find_by_email(&email, db).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".into()));
        }
        if Self::find_by_username(&username, db).await?.is_some() {
            return Err(AppError::Conflict("Username already taken".into()));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let user: Option<User> = db
            .client
            .query(
                "CREATE type::thing('user', $id) SET
                email = $email,
                username = $username,
                password = crypto::argon2::generate($password),
                full_name = $full_name,
                avatar_url = NONE,
                is_active = true,
                created_at = $created_at,
                updated_at = $updated_at",
            )
            .bind(("id", id))
            .bind(("email", email))
            .bind(("username", username))
            .bind(("password", password))
            .bind(("full_name", full_name))
            .bind(("created_at", surrealdb::Datetime::from(now)))
            .bind(("updated_at", surrealdb::Datetime::from(now)))
            .await?
            .take(0)?;

        user.ok_or(AppError::InternalError("User failed to create".into()))
    }

    pub async fn authenticate(
        email: &str,
        password: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let user: Option<User> = db
            .client
            .query(
                "SELECT * FROM user
                WHERE email = $email
                AND crypto::argon2::compare(password, $password)",
            )
            .bind(("email", email.trim().to_lowercase()))
            .bind(("password", password.to_owned()))
            .await?
            .take(0)?;

        match user {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AppError::Auth("Invalid email or password".into())),
        }
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn find_by_username(
        username: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE username = $username LIMIT 1")
            .bind(("username", username.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    /// Picks a free username from the local part of `email`, adding a counter on clashes.
    pub async fn derive_username(email: &str, db: &SurrealDbClient) -> Result<String, AppError> {
        let local = email.split('@').next().unwrap_or_default().trim();
        let mut base: String = local.chars().take(40).collect();
        if base.chars().count() < 3 {
            base = format!("user_{base}");
        }

        let mut candidate = base.clone();
        let mut counter: u32 = 1;
        while Self::find_by_username(&candidate, db).await?.is_some() {
            candidate = format!("{base}{counter}");
            counter = counter.saturating_add(1);
        }

        Ok(candidate)
    }

    pub async fn patch_profile(
        id: &str,
        full_name: Option<String>,
        avatar_url: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let current: User = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        let user: Option<User> = db
            .client
            .query(
                "UPDATE type::thing('user', $id) SET
                full_name = $full_name,
                avatar_url = $avatar_url,
                updated_at = $updated_at
                RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .bind(("full_name", full_name.unwrap_or(current.full_name)))
            .bind(("avatar_url", avatar_url.or(current.avatar_url)))
            .bind(("updated_at", surrealdb::Datetime::from(Utc::now())))
            .await?
            .take(0)?;

        user.ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    pub async fn change_password(
        id: &str,
        old_password: &str,
        new_password: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        validate_password(new_password)?;

        let verified: Option<User> = db
            .client
            .query(
                "SELECT * FROM type::thing('user', $id)
                WHERE crypto::argon2::compare(password, $password)",
            )
            .bind(("id", id.to_owned()))
            .bind(("password", old_password.to_owned()))
            .await?
            .take(0)?;

        if verified.is_none() {
            return Err(AppError::Auth("Current password is incorrect".into()));
        }

        db.client
            .query(
                "UPDATE type::thing('user', $id)
                SET password = crypto::argon2::generate($password), updated_at = $updated_at",
            )
            .bind(("id", id.to_owned()))
            .bind(("password", new_password.to_owned()))
            .bind(("updated_at", surrealdb::Datetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn get_user_conversations(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Conversation>, AppError> {
        let conversations: Vec<Conversation> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE user_id = $user_id ORDER BY updated_at DESC",
            )
            .bind(("table_name", Conversation::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(conversations)
    }
}
