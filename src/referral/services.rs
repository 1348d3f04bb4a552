use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::code;
use super::dto::ApplyReferralRequest;
use crate::{
    auth::services::current_user,
    error::AppError,
    state::AppState,
    users::{
        store::{ReferralOutcome, StoreError},
        User,
    },
};

/// Candidate codes tried before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 10;
/// Points for sharing the referral link.
pub const SHARE_POINTS: i32 = 2;

/// Returns `user` with a referral code, issuing one on first access.
pub async fn ensure_code(state: &AppState, user: User) -> Result<User, AppError> {
    if user.referral_code.is_some() {
        return Ok(user);
    }
    let user_id = user.id;
    assign_code(state, user_id, || code::candidate(user_id)).await
}

async fn assign_code<F>(state: &AppState, user_id: Uuid, mut next: F) -> Result<User, AppError>
where
    F: FnMut() -> String,
{
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let candidate = next();
        if state.store.referral_code_exists(&candidate).await? {
            debug!(attempt, "referral code collision");
            continue;
        }
        match state.store.assign_referral_code(user_id, &candidate).await {
            Ok(Some(user)) => {
                info!(user_id = %user_id, "referral code issued");
                return Ok(user);
            }
            // Another request issued a code first.
            Ok(None) => return current_user(state, user_id).await,
            Err(StoreError::Duplicate(_)) => {
                debug!(attempt, "referral code taken concurrently");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    warn!(user_id = %user_id, "referral code attempts exhausted");
    Err(AppError::CodeGenerationExhausted)
}

#[instrument(skip(state))]
pub async fn referral_info(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    let user = current_user(state, user_id).await?;
    ensure_code(state, user).await
}

/// Links the caller to the owner of `referral_code`, crediting both.
#[instrument(skip(state, req))]
pub async fn apply(
    state: &AppState,
    user_id: Uuid,
    req: ApplyReferralRequest,
) -> Result<User, AppError> {
    let raw = req
        .referral_code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::validation("Referral code is required"))?;
    let code = raw.trim().to_ascii_uppercase();
    if !code::is_well_formed(&code) {
        return Err(AppError::NotFound("Invalid referral code".into()));
    }

    let caller = current_user(state, user_id).await?;
    let referrer = state
        .store
        .find_by_referral_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound("Invalid referral code".into()))?;

    if referrer.id == caller.id {
        warn!(user_id = %caller.id, "self referral attempt");
        return Err(AppError::SelfReferral);
    }
    if caller.referred_by.is_some() {
        return Err(AppError::AlreadyReferred);
    }

    match state.store.apply_referral(caller.id, referrer.id).await? {
        ReferralOutcome::Applied { referee, referrer } => {
            info!(
                referee = %referee.id,
                referrer = %referrer.id,
                referrer_count = referrer.referral_count,
                "referral applied"
            );
            Ok(referee)
        }
        ReferralOutcome::AlreadyReferred => Err(AppError::AlreadyReferred),
    }
}

/// Credits the caller for sharing. Not rate limited.
#[instrument(skip(state))]
pub async fn share(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    current_user(state, user_id).await?;
    let user = state.store.add_points(user_id, SHARE_POINTS).await?;
    info!(user_id = %user_id, points = user.referral_points, "share rewarded");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::code::CODE_LEN;
    use crate::state::Fakes;
    use crate::users::{NewUser, UserStore};

    async fn user(fakes: &Fakes, email: &str) -> User {
        fakes
            .store
            .create(NewUser {
                email: email.into(),
                name: None,
                profile_picture: None,
                password_hash: Some("hash".into()),
                is_verified: true,
                oauth_id: None,
                verification_token: None,
                verification_token_expiry: None,
            })
            .await
            .unwrap()
    }

    fn req(code: &str) -> ApplyReferralRequest {
        ApplyReferralRequest {
            referral_code: Some(code.into()),
        }
    }

    #[tokio::test]
    async fn code_is_issued_once() {
        let (state, fakes) = AppState::fake();
        let u = user(&fakes, "a@example.com").await;
        let first = referral_info(&state, u.id).await.unwrap();
        let code = first.referral_code.clone().unwrap();
        assert_eq!(code.len(), CODE_LEN);
        let second = referral_info(&state, u.id).await.unwrap();
        assert_eq!(second.referral_code.as_deref(), Some(code.as_str()));
    }

    #[tokio::test]
    async fn code_generation_gives_up_after_bounded_collisions() {
        let (state, fakes) = AppState::fake();
        let owner = user(&fakes, "a@example.com").await;
        fakes
            .store
            .assign_referral_code(owner.id, "TAKEN123")
            .await
            .unwrap();
        let other = user(&fakes, "b@example.com").await;

        let mut calls = 0;
        let err = assign_code(&state, other.id, || {
            calls += 1;
            "TAKEN123".to_string()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::CodeGenerationExhausted));
        assert_eq!(calls, MAX_CODE_ATTEMPTS);
    }

    #[tokio::test]
    async fn collision_retries_with_next_candidate() {
        let (state, fakes) = AppState::fake();
        let owner = user(&fakes, "a@example.com").await;
        fakes
            .store
            .assign_referral_code(owner.id, "TAKEN123")
            .await
            .unwrap();
        let other = user(&fakes, "b@example.com").await;

        let mut candidates = vec!["FRESH456", "TAKEN123"];
        let assigned = assign_code(&state, other.id, || candidates.pop().unwrap().to_string())
            .await
            .unwrap();
        assert_eq!(assigned.referral_code.as_deref(), Some("FRESH456"));
    }

    #[tokio::test]
    async fn apply_credits_both_sides_once() {
        let (state, fakes) = AppState::fake();
        let referrer = referral_info(&state, user(&fakes, "a@example.com").await.id)
            .await
            .unwrap();
        let code = referrer.referral_code.clone().unwrap();
        let caller = user(&fakes, "b@example.com").await;

        let updated = apply(&state, caller.id, req(&code.to_lowercase()))
            .await
            .unwrap();
        assert_eq!(updated.referral_points, 2);
        assert_eq!(updated.referred_by, Some(referrer.id));

        let referrer = fakes.store.find_by_id(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.referral_points, 5);
        assert_eq!(referrer.referral_count, 1);

        let err = apply(&state, caller.id, req(&code)).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyReferred));
        let referrer = fakes.store.find_by_id(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.referral_count, 1);
    }

    #[tokio::test]
    async fn self_referral_always_fails() {
        let (state, fakes) = AppState::fake();
        let me = referral_info(&state, user(&fakes, "a@example.com").await.id)
            .await
            .unwrap();
        let code = me.referral_code.clone().unwrap();
        let err = apply(&state, me.id, req(&code)).await.unwrap_err();
        assert!(matches!(err, AppError::SelfReferral));

        // Still self-referral after the account has been referred by someone else.
        let other = referral_info(&state, user(&fakes, "b@example.com").await.id)
            .await
            .unwrap();
        apply(&state, me.id, req(other.referral_code.as_deref().unwrap()))
            .await
            .unwrap();
        let err = apply(&state, me.id, req(&code)).await.unwrap_err();
        assert!(matches!(err, AppError::SelfReferral));
    }

    #[tokio::test]
    async fn unknown_or_blank_code() {
        let (state, fakes) = AppState::fake();
        let caller = user(&fakes, "a@example.com").await;
        assert!(matches!(
            apply(&state, caller.id, req("NOPE0000")).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            apply(&state, caller.id, req("   ")).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn code_with_trailing_characters_is_not_found() {
        let (state, fakes) = AppState::fake();
        let owner = referral_info(&state, user(&fakes, "a@example.com").await.id)
            .await
            .unwrap();
        let code = owner.referral_code.clone().unwrap();
        let caller = user(&fakes, "b@example.com").await;

        for submitted in [
            format!("{code}-ZZZZ-9999"),
            format!("{code}X"),
            format!("{}-{}", &code[..4], &code[4..]),
        ] {
            let err = apply(&state, caller.id, req(&submitted)).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)), "{submitted} accepted");
        }

        let caller = fakes.store.find_by_id(caller.id).await.unwrap().unwrap();
        assert!(caller.referred_by.is_none());
        assert_eq!(caller.referral_points, 0);
        let owner = fakes.store.find_by_id(owner.id).await.unwrap().unwrap();
        assert_eq!(owner.referral_count, 0);

        // Surrounding whitespace and case are still forgiven.
        apply(&state, caller.id, req(&format!("  {}  ", code.to_lowercase())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn share_accrues_every_call() {
        let (state, fakes) = AppState::fake();
        let u = user(&fakes, "a@example.com").await;
        share(&state, u.id).await.unwrap();
        let u = share(&state, u.id).await.unwrap();
        assert_eq!(u.referral_points, 2 * SHARE_POINTS);
    }

    #[tokio::test]
    async fn unknown_caller_is_unauthorized() {
        let (state, _) = AppState::fake();
        assert!(matches!(
            share(&state, Uuid::new_v4()).await.unwrap_err(),
            AppError::Unauthorized(_)
        ));
    }
}
