use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use super::store::{
    ReferralOutcome, StoreError, StoreResult, UserStore, REFEREE_POINTS, REFERRER_POINTS,
};

/// Postgres-backed user store.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().is_some_and(|code| code.as_ref() == "23505") {
                let constraint = db_err.constraint().unwrap_or("unique index").to_string();
                return StoreError::Duplicate(constraint);
            }
        }
        StoreError::Backend(anyhow::Error::new(err))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new_user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, profile_picture, password_hash, is_verified,
                               oauth_id, verification_token, verification_token_expiry)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.profile_picture)
        .bind(&new_user.password_hash)
        .bind(new_user.is_verified)
        .bind(&new_user.oauth_id)
        .bind(&new_user.verification_token)
        .bind(new_user.verification_token_expiry)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT *
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_referral_code(&self, code: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE referral_code = $1"#)
            .bind(code)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM users WHERE referral_code = $1)"#)
                .bind(code)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET verification_token = $2,
                   verification_token_expiry = $3,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expiry)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET is_verified = TRUE,
                   verification_token = NULL,
                   verification_token_expiry = NULL,
                   updated_at = now()
             WHERE verification_token = $1
            RETURNING *
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_failed_login(&self, id: Uuid, max_attempts: i32) -> StoreResult<User> {
        // Right-hand sides see the pre-update row.
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET login_attempts = login_attempts + 1,
                   account_locked = account_locked OR login_attempts + 1 >= $2,
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_successful_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET login_attempts = 0,
                   last_login = $2,
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn link_oauth(
        &self,
        id: Uuid,
        oauth_id: &str,
        upstream_verified: bool,
        profile_picture: Option<&str>,
    ) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET oauth_id = COALESCE(oauth_id, $2),
                   is_verified = is_verified OR $3,
                   profile_picture = COALESCE(profile_picture, $4),
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(oauth_id)
        .bind(upstream_verified)
        .bind(profile_picture)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET reset_token = $2,
                   reset_token_expiry = $3,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expiry)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET password_hash = $2,
                   reset_token = NULL,
                   reset_token_expiry = NULL,
                   login_attempts = 0,
                   account_locked = FALSE,
                   updated_at = now()
             WHERE reset_token = $1
               AND reset_token_expiry > $3
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(new_password_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn assign_referral_code(&self, id: Uuid, code: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET referral_code = $2,
                   updated_at = now()
             WHERE id = $1
               AND referral_code IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(code)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn apply_referral(
        &self,
        referee_id: Uuid,
        referrer_id: Uuid,
    ) -> StoreResult<ReferralOutcome> {
        let mut tx = self.db.begin().await?;

        let referee = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET referred_by = $2,
                   referral_points = referral_points + $3,
                   updated_at = now()
             WHERE id = $1
               AND referred_by IS NULL
            RETURNING *
            "#,
        )
        .bind(referee_id)
        .bind(referrer_id)
        .bind(REFEREE_POINTS)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(referee) = referee else {
            tx.rollback().await?;
            return Ok(ReferralOutcome::AlreadyReferred);
        };

        let referrer = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET referral_points = referral_points + $2,
                   referral_count = referral_count + 1,
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(referrer_id)
        .bind(REFERRER_POINTS)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReferralOutcome::Applied { referee, referrer })
    }

    async fn add_points(&self, id: Uuid, points: i32) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET referral_points = referral_points + $2,
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(points)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        profile_picture: Option<&str>,
    ) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   profile_picture = COALESCE($3, profile_picture),
                   updated_at = now()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(profile_picture)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }
}
