use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write; carries the constraint name.
    #[error("duplicate value for {0}")]
    Duplicate(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub enum ReferralOutcome {
    Applied { referee: User, referrer: User },
    AlreadyReferred,
}

/// Points credited to the owner of a redeemed code.
pub const REFERRER_POINTS: i32 = 5;
/// Points credited to the account redeeming a code.
pub const REFEREE_POINTS: i32 = 2;

/// Persistence for user records. Every method is a single atomic write (or
/// a transaction), so concurrent requests never lose an increment.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new_user: NewUser) -> StoreResult<User>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_referral_code(&self, code: &str) -> StoreResult<Option<User>>;
    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool>;

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> StoreResult<()>;

    /// Marks the owner verified and clears the token. Returns `None` when no
    /// user holds `token`.
    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Increments `login_attempts`, locking once it reaches `max_attempts`.
    async fn record_failed_login(&self, id: Uuid, max_attempts: i32) -> StoreResult<User>;

    async fn record_successful_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<User>;

    /// Backfills the OAuth linkage and picture when absent and upgrades
    /// `is_verified` when the provider vouches for the email.
    async fn link_oauth(
        &self,
        id: Uuid,
        oauth_id: &str,
        upstream_verified: bool,
        profile_picture: Option<&str>,
    ) -> StoreResult<User>;

    async fn set_reset_token(&self, id: Uuid, token: &str, expiry: OffsetDateTime)
        -> StoreResult<()>;

    /// Replaces the password hash when `token` is pending and unexpired at
    /// `now`. Also clears the lockout.
    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    /// Returns `None` if the user already has a code.
    async fn assign_referral_code(&self, id: Uuid, code: &str) -> StoreResult<Option<User>>;

    async fn apply_referral(&self, referee_id: Uuid, referrer_id: Uuid)
        -> StoreResult<ReferralOutcome>;

    async fn add_points(&self, id: Uuid, points: i32) -> StoreResult<User>;

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        profile_picture: Option<&str>,
    ) -> StoreResult<User>;
}
