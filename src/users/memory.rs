use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use super::store::{
    ReferralOutcome, StoreError, StoreResult, UserStore, REFEREE_POINTS, REFERRER_POINTS,
};

/// In-process store with the same uniqueness rules as the Postgres schema.
/// One lock over the whole table keeps each call atomic.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Overwrites a record wholesale; lets tests stage states such as an
    /// expired reset token.
    pub async fn put(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }
}

fn missing(id: Uuid) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("user {id} not found"))
}

fn with_user<F>(users: &mut HashMap<Uuid, User>, id: Uuid, f: F) -> StoreResult<User>
where
    F: FnOnce(&mut User),
{
    let user = users.get_mut(&id).ok_or_else(|| missing(id))?;
    f(user);
    user.updated_at = OffsetDateTime::now_utc();
    Ok(user.clone())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new_user: NewUser) -> StoreResult<User> {
        if !new_user.has_credential() {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "users_credential_present violated"
            )));
        }
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(StoreError::Duplicate("users_email_key".into()));
        }
        if let Some(oauth_id) = &new_user.oauth_id {
            if users.values().any(|u| u.oauth_id.as_ref() == Some(oauth_id)) {
                return Err(StoreError::Duplicate("users_oauth_id_key".into()));
            }
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            profile_picture: new_user.profile_picture,
            password_hash: new_user.password_hash,
            is_verified: new_user.is_verified,
            oauth_id: new_user.oauth_id,
            verification_token: new_user.verification_token,
            verification_token_expiry: new_user.verification_token_expiry,
            reset_token: None,
            reset_token_expiry: None,
            login_attempts: 0,
            account_locked: false,
            referral_code: None,
            referred_by: None,
            referral_points: 0,
            referral_count: 0,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_referral_code(&self, code: &str) -> StoreResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.referral_code.as_deref() == Some(code))
            .cloned())
    }

    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool> {
        Ok(self.find_by_referral_code(code).await?.is_some())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| {
            u.verification_token = Some(token.to_string());
            u.verification_token_expiry = Some(expiry);
        })?;
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>> {
        let mut users = self.users.lock().await;
        let Some(id) = users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .map(|u| u.id)
        else {
            return Ok(None);
        };
        with_user(&mut users, id, |u| {
            u.is_verified = true;
            u.verification_token = None;
            u.verification_token_expiry = None;
        })
        .map(Some)
    }

    async fn record_failed_login(&self, id: Uuid, max_attempts: i32) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| {
            u.login_attempts += 1;
            if u.login_attempts >= max_attempts {
                u.account_locked = true;
            }
        })
    }

    async fn record_successful_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| {
            u.login_attempts = 0;
            u.last_login = Some(at);
        })
    }

    async fn link_oauth(
        &self,
        id: Uuid,
        oauth_id: &str,
        upstream_verified: bool,
        profile_picture: Option<&str>,
    ) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.id != id && u.oauth_id.as_deref() == Some(oauth_id))
        {
            return Err(StoreError::Duplicate("users_oauth_id_key".into()));
        }
        with_user(&mut users, id, |u| {
            if u.oauth_id.is_none() {
                u.oauth_id = Some(oauth_id.to_string());
            }
            u.is_verified = u.is_verified || upstream_verified;
            if u.profile_picture.is_none() {
                u.profile_picture = profile_picture.map(str::to_string);
            }
        })
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| {
            u.reset_token = Some(token.to_string());
            u.reset_token_expiry = Some(expiry);
        })?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.lock().await;
        let Some(id) = users
            .values()
            .find(|u| {
                u.reset_token.as_deref() == Some(token)
                    && u.reset_token_expiry.is_some_and(|exp| exp > now)
            })
            .map(|u| u.id)
        else {
            return Ok(None);
        };
        with_user(&mut users, id, |u| {
            u.password_hash = Some(new_password_hash.to_string());
            u.reset_token = None;
            u.reset_token_expiry = None;
            u.login_attempts = 0;
            u.account_locked = false;
        })
        .map(Some)
    }

    async fn assign_referral_code(&self, id: Uuid, code: &str) -> StoreResult<Option<User>> {
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.referral_code.as_deref() == Some(code))
        {
            return Err(StoreError::Duplicate("users_referral_code_key".into()));
        }
        let user = users.get(&id).ok_or_else(|| missing(id))?;
        if user.referral_code.is_some() {
            return Ok(None);
        }
        with_user(&mut users, id, |u| u.referral_code = Some(code.to_string())).map(Some)
    }

    async fn apply_referral(
        &self,
        referee_id: Uuid,
        referrer_id: Uuid,
    ) -> StoreResult<ReferralOutcome> {
        let mut users = self.users.lock().await;
        if !users.contains_key(&referrer_id) {
            return Err(missing(referrer_id));
        }
        let referee = users.get(&referee_id).ok_or_else(|| missing(referee_id))?;
        if referee.referred_by.is_some() {
            return Ok(ReferralOutcome::AlreadyReferred);
        }
        let referee = with_user(&mut users, referee_id, |u| {
            u.referred_by = Some(referrer_id);
            u.referral_points += REFEREE_POINTS;
        })?;
        let referrer = with_user(&mut users, referrer_id, |u| {
            u.referral_points += REFERRER_POINTS;
            u.referral_count += 1;
        })?;
        Ok(ReferralOutcome::Applied { referee, referrer })
    }

    async fn add_points(&self, id: Uuid, points: i32) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| u.referral_points += points)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        profile_picture: Option<&str>,
    ) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        with_user(&mut users, id, |u| {
            if let Some(name) = name {
                u.name = Some(name.to_string());
            }
            if let Some(picture) = profile_picture {
                u.profile_picture = Some(picture.to_string());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn local_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: None,
            profile_picture: None,
            password_hash: Some("hash".into()),
            is_verified: false,
            oauth_id: None,
            verification_token: Some(format!("tok-{email}")),
            verification_token_expiry: Some(OffsetDateTime::now_utc() + Duration::hours(24)),
        }
    }

    #[tokio::test]
    async fn email_uniqueness_is_case_insensitive() {
        let store = MemoryUserStore::new();
        store.create(local_user("a@example.com")).await.unwrap();
        let err = store.create(local_user("A@Example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn create_requires_password_or_oauth() {
        let store = MemoryUserStore::new();
        let mut new_user = local_user("a@example.com");
        new_user.password_hash = None;
        assert!(store.create(new_user).await.is_err());
    }

    #[tokio::test]
    async fn failed_logins_lock_at_threshold() {
        let store = MemoryUserStore::new();
        let user = store.create(local_user("a@example.com")).await.unwrap();
        for _ in 0..4 {
            let u = store.record_failed_login(user.id, 5).await.unwrap();
            assert!(!u.account_locked);
        }
        let u = store.record_failed_login(user.id, 5).await.unwrap();
        assert_eq!(u.login_attempts, 5);
        assert!(u.account_locked);
    }

    #[tokio::test]
    async fn verification_token_consumed_once() {
        let store = MemoryUserStore::new();
        store.create(local_user("a@example.com")).await.unwrap();
        let first = store
            .consume_verification_token("tok-a@example.com")
            .await
            .unwrap();
        assert!(first.is_some_and(|u| u.is_verified && u.verification_token.is_none()));
        let second = store
            .consume_verification_token("tok-a@example.com")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn assign_referral_code_rejects_duplicates_and_reassignment() {
        let store = MemoryUserStore::new();
        let a = store.create(local_user("a@example.com")).await.unwrap();
        let b = store.create(local_user("b@example.com")).await.unwrap();
        assert!(store.assign_referral_code(a.id, "AAAA1111").await.unwrap().is_some());
        assert!(store.assign_referral_code(a.id, "BBBB2222").await.unwrap().is_none());
        let err = store.assign_referral_code(b.id, "AAAA1111").await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
