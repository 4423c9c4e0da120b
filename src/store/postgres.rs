//! PostgreSQL user store
//!
//! Uniqueness of emails, phones and provider subjects is enforced by named
//! constraints (see `migrations/`); violations surface as
//! [`StoreError::UniqueViolation`] carrying the constraint name.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{StoreError, StoreResult, UnlinkOutcome, UserStore};
use crate::models::{
    identity::{LinkedIdentity, NewIdentity, Provider},
    user::{NewUser, UserWithPassword},
};

const USER_COLUMNS: &str = "id, email, phone, name, password_hash, email_verified, banned, \
                            deleted_at, created_at, updated_at";

const IDENTITY_COLUMNS: &str = "id, user_id, provider, subject, secondary_subject, created_at";

pub(crate) fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            let constraint = db_error.constraint().unwrap_or_default().to_string();
            return StoreError::UniqueViolation(constraint);
        }
        if db_error.is_foreign_key_violation() {
            return StoreError::NotFound;
        }
    }

    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Database(other),
    }
}

/// [`UserStore`] backed by a Postgres pool
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user_where(
        &self,
        clause: &str,
        value: &str,
    ) -> StoreResult<Option<UserWithPassword>> {
        let query = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, clause);
        sqlx::query_as::<_, UserWithPassword>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn update_user(&self, set_clause: &str, user_id: i64) -> StoreResult<sqlx::postgres::PgQueryResult> {
        let query = format!(
            "UPDATE users SET {}, updated_at = NOW() WHERE id = $1",
            set_clause
        );
        let result = sqlx::query(&query)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(result)
    }
}

fn insert_user_sql() -> String {
    format!(
        "INSERT INTO users (email, phone, name, password_hash, email_verified) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        USER_COLUMNS
    )
}

fn insert_identity_sql() -> String {
    format!(
        "INSERT INTO linked_identities (user_id, provider, subject, secondary_subject) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        IDENTITY_COLUMNS
    )
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserWithPassword>> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserWithPassword>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        self.find_user_where("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserWithPassword>> {
        self.find_user_where("phone", phone).await
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserWithPassword> {
        sqlx::query_as::<_, UserWithPassword>(&insert_user_sql())
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.email_verified)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn create_user_with_identity(
        &self,
        user: NewUser,
        identity: NewIdentity,
    ) -> StoreResult<(UserWithPassword, LinkedIdentity)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let record = sqlx::query_as::<_, UserWithPassword>(&insert_user_sql())
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.email_verified)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let link = sqlx::query_as::<_, LinkedIdentity>(&insert_identity_sql())
            .bind(record.id)
            .bind(identity.provider.as_str())
            .bind(&identity.subject)
            .bind(&identity.secondary_subject)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok((record, link))
    }

    async fn find_identity(
        &self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<LinkedIdentity>> {
        let query = format!(
            "SELECT {} FROM linked_identities WHERE provider = $1 AND subject = $2",
            IDENTITY_COLUMNS
        );
        sqlx::query_as::<_, LinkedIdentity>(&query)
            .bind(provider.as_str())
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_identities(&self, user_id: i64) -> StoreResult<Vec<LinkedIdentity>> {
        let query = format!(
            "SELECT {} FROM linked_identities WHERE user_id = $1 ORDER BY created_at",
            IDENTITY_COLUMNS
        );
        sqlx::query_as::<_, LinkedIdentity>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_identity(
        &self,
        user_id: i64,
        identity: NewIdentity,
    ) -> StoreResult<LinkedIdentity> {
        sqlx::query_as::<_, LinkedIdentity>(&insert_identity_sql())
            .bind(user_id)
            .bind(identity.provider.as_str())
            .bind(&identity.subject)
            .bind(&identity.secondary_subject)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove_identity(&self, user_id: i64, provider: Provider) -> StoreResult<UnlinkOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Row lock serializes concurrent unlinks of the same account
        let password_hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        let Some(password_hash) = password_hash else {
            return Err(StoreError::NotFound);
        };

        let linked: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM linked_identities WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        let target: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM linked_identities WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(identity_id) = target else {
            return Ok(UnlinkOutcome::NotLinked);
        };

        if password_hash.is_none() && linked <= 1 {
            return Ok(UnlinkOutcome::LastCredential);
        }

        sqlx::query("DELETE FROM linked_identities WHERE id = $1")
            .bind(identity_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(UnlinkOutcome::Removed)
    }

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()> {
        self.update_user("email_verified = TRUE", user_id).await?;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_banned(&self, user_id: i64, banned: bool) -> StoreResult<()> {
        let clause = if banned { "banned = TRUE" } else { "banned = FALSE" };
        self.update_user(clause, user_id).await?;
        Ok(())
    }

    async fn set_deleted(&self, user_id: i64, deleted: bool) -> StoreResult<()> {
        let clause = if deleted {
            "deleted_at = NOW()"
        } else {
            "deleted_at = NULL"
        };
        self.update_user(clause, user_id).await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
