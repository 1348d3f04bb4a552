use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String, // stored lowercased
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub password_hash: Option<String>, // Argon2 PHC string
    pub is_verified: bool,
    pub oauth_id: Option<String>,
    pub verification_token: Option<String>,
    pub verification_token_expiry: Option<OffsetDateTime>,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub login_attempts: i32,
    pub account_locked: bool,
    pub referral_code: Option<String>,
    pub referred_by: Option<Uuid>,
    pub referral_points: i32,
    pub referral_count: i32,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Where an account sits in the login state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Unverified,
    Active,
    Locked,
}

impl User {
    pub fn state(&self) -> AccountState {
        if self.account_locked {
            AccountState::Locked
        } else if !self.is_verified {
            AccountState::Unverified
        } else {
            AccountState::Active
        }
    }

    pub fn has_oauth(&self) -> bool {
        self.oauth_id.is_some()
    }
}

/// Fields supplied when a user is first inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub oauth_id: Option<String>,
    pub verification_token: Option<String>,
    pub verification_token_expiry: Option<OffsetDateTime>,
}

#[cfg(test)]
impl NewUser {
    pub fn has_credential(&self) -> bool {
        self.password_hash.is_some() || self.oauth_id.is_some()
    }
}
