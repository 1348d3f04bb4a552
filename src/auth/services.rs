//! Account flows: registration, verification, the login guard, Google
//! sign-in, password reset and profile updates.

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    EmailRequest, GoogleLoginRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
    UpdateProfileRequest,
};
use super::google::IdentityError;
use super::jwt::JwtKeys;
use super::password::{hash_password, unusable_password_hash, verify_password};
use super::tokens::{generate_token, RESET_TOKEN_TTL, VERIFICATION_TOKEN_TTL};
use crate::{
    error::AppError,
    mailer::templates,
    state::AppState,
    users::{store::StoreError, AccountState, NewUser, User},
};

/// Failed password attempts before the account locks.
pub const MAX_LOGIN_ATTEMPTS: i32 = 5;
const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::validation(message))
}

fn normalize_email(value: Option<String>) -> Result<String, AppError> {
    let email = required(value, "Email is required")?.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

fn new_password(value: Option<String>) -> Result<String, AppError> {
    let password = required(value, "Password is required")?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(password)
}

pub fn issue_token(state: &AppState, user_id: Uuid) -> Result<String, AppError> {
    JwtKeys::from_ref(state).sign(user_id).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        AppError::Internal(e)
    })
}

async fn send_verification(
    state: &AppState,
    email: &str,
    name: Option<&str>,
    token: &str,
) -> anyhow::Result<()> {
    let mail = templates::verify_email(name, &state.config.verify_email_link(token));
    state.mailer.deliver(email, &mail.subject, &mail.body).await
}

/// Replaces any pending verification token; returns the new one.
async fn renew_verification_token(state: &AppState, user_id: Uuid) -> Result<String, AppError> {
    let token = generate_token()?;
    let expiry = OffsetDateTime::now_utc() + VERIFICATION_TOKEN_TTL;
    state
        .store
        .set_verification_token(user_id, &token, expiry)
        .await?;
    Ok(token)
}

#[instrument(skip(state, req))]
pub async fn register(state: &AppState, req: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(req.email)?;
    let password = new_password(req.password)?;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if state.store.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(&password)?;
    let token = generate_token()?;
    let user = state
        .store
        .create(NewUser {
            email,
            name,
            profile_picture: None,
            password_hash: Some(password_hash),
            is_verified: false,
            oauth_id: None,
            verification_token: Some(token.clone()),
            verification_token_expiry: Some(OffsetDateTime::now_utc() + VERIFICATION_TOKEN_TTL),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => AppError::Conflict("User already exists".into()),
            other => other.into(),
        })?;

    // The account exists regardless of mail delivery; the response does not wait.
    let mail_state = state.clone();
    let (user_id, email, name) = (user.id, user.email.clone(), user.name.clone());
    tokio::spawn(async move {
        if let Err(e) = send_verification(&mail_state, &email, name.as_deref(), &token).await {
            error!(error = %e, user_id = %user_id, "verification email failed");
        }
    });

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Consumes a verification token and logs the user in.
#[instrument(skip(state, token))]
pub async fn verify_email(state: &AppState, token: &str) -> Result<(User, String), AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::InvalidToken);
    }
    // Expiry is not enforced here; see DESIGN.md.
    let user = state
        .store
        .consume_verification_token(token)
        .await?
        .ok_or(AppError::InvalidToken)?;

    let jwt = issue_token(state, user.id)?;
    info!(user_id = %user.id, "email verified");
    Ok((user, jwt))
}

#[instrument(skip(state, req))]
pub async fn login(state: &AppState, req: LoginRequest) -> Result<(User, String), AppError> {
    let email = required(req.email, "Email and password are required")?
        .trim()
        .to_lowercase();
    let password = required(req.password, "Email and password are required")?;

    let Some(user) = state.store.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    match user.state() {
        AccountState::Locked => {
            warn!(user_id = %user.id, "login on locked account");
            return Err(AppError::AccountLocked);
        }
        AccountState::Unverified if !user.has_oauth() => {
            // Each attempt rotates the token and re-sends the link.
            let token = renew_verification_token(state, user.id).await?;
            if let Err(e) = send_verification(state, &user.email, user.name.as_deref(), &token).await
            {
                error!(error = %e, user_id = %user.id, "verification resend failed");
            }
            info!(user_id = %user.id, "login blocked until email verified");
            return Err(AppError::EmailNotVerified);
        }
        _ => {}
    }

    let matches = match user.password_hash.as_deref() {
        Some(hash) => verify_password(&password, hash)?,
        None => false,
    };

    if !matches {
        let updated = state
            .store
            .record_failed_login(user.id, MAX_LOGIN_ATTEMPTS)
            .await?;
        warn!(
            user_id = %user.id,
            attempts = updated.login_attempts,
            locked = updated.account_locked,
            "login invalid password"
        );
        return Err(AppError::InvalidCredentials);
    }

    let user = state
        .store
        .record_successful_login(user.id, OffsetDateTime::now_utc())
        .await?;
    let jwt = issue_token(state, user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, jwt))
}

/// Google sign-in. Never gated on lockout or verification state.
#[instrument(skip(state, req))]
pub async fn google_login(
    state: &AppState,
    req: GoogleLoginRequest,
) -> Result<(User, String), AppError> {
    let id_token = required(req.id_token, "Google ID token is required")?;
    let identity = state
        .identity
        .verify(id_token.trim())
        .await
        .map_err(|e| match e {
            IdentityError::Rejected(reason) => {
                warn!(reason = %reason, "google id token rejected");
                AppError::InvalidIdToken
            }
            IdentityError::Unavailable(e) => AppError::Internal(e),
        })?;

    let user = match state.store.find_by_email(&identity.email).await? {
        Some(existing) => {
            state
                .store
                .link_oauth(
                    existing.id,
                    &identity.subject,
                    identity.email_verified,
                    identity.picture.as_deref(),
                )
                .await?
        }
        None => {
            let user = state
                .store
                .create(NewUser {
                    email: identity.email.clone(),
                    name: identity.name.clone(),
                    profile_picture: identity.picture.clone(),
                    password_hash: Some(unusable_password_hash()?),
                    is_verified: identity.email_verified,
                    oauth_id: Some(identity.subject.clone()),
                    verification_token: None,
                    verification_token_expiry: None,
                })
                .await?;
            info!(user_id = %user.id, "user created via google");
            user
        }
    };

    let jwt = issue_token(state, user.id)?;
    info!(user_id = %user.id, "google login");
    Ok((user, jwt))
}

/// Always succeeds for well-formed input so the response does not reveal
/// whether the account exists.
#[instrument(skip(state, req))]
pub async fn forgot_password(state: &AppState, req: EmailRequest) -> Result<(), AppError> {
    let email = normalize_email(req.email)?;
    let Some(user) = state.store.find_by_email(&email).await? else {
        info!("password reset requested for unknown email");
        return Ok(());
    };

    let token = generate_token()?;
    let expiry = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    state.store.set_reset_token(user.id, &token, expiry).await?;

    let mail = templates::reset_password(
        user.name.as_deref(),
        &state.config.reset_password_link(&token),
    );
    state
        .mailer
        .deliver(&user.email, &mail.subject, &mail.body)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "reset email failed");
            AppError::Internal(e)
        })?;

    info!(user_id = %user.id, "password reset requested");
    Ok(())
}

#[instrument(skip(state, req))]
pub async fn reset_password(state: &AppState, req: ResetPasswordRequest) -> Result<(), AppError> {
    let token = required(req.token, "Reset token is required")?;
    let password = new_password(req.password)?;

    let hash = hash_password(&password)?;
    let user = state
        .store
        .consume_reset_token(token.trim(), &hash, OffsetDateTime::now_utc())
        .await?
        .ok_or(AppError::InvalidOrExpiredToken)?;

    info!(user_id = %user.id, "password reset");
    Ok(())
}

/// Like forgot-password, unknown and already-verified addresses get the same
/// acknowledgement.
#[instrument(skip(state, req))]
pub async fn resend_verification(state: &AppState, req: EmailRequest) -> Result<(), AppError> {
    let email = normalize_email(req.email)?;
    match state.store.find_by_email(&email).await? {
        Some(user) if !user.is_verified => {
            let token = renew_verification_token(state, user.id).await?;
            send_verification(state, &user.email, user.name.as_deref(), &token)
                .await
                .map_err(|e| {
                    error!(error = %e, user_id = %user.id, "verification resend failed");
                    AppError::Internal(e)
                })?;
            info!(user_id = %user.id, "verification email re-sent");
        }
        Some(_) => info!("resend requested for verified account"),
        None => info!("resend requested for unknown email"),
    }
    Ok(())
}

pub async fn current_user(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))
}

#[instrument(skip(state, req))]
pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> Result<User, AppError> {
    let name = match req.name {
        Some(n) if n.trim().is_empty() => return Err(AppError::validation("Name cannot be empty")),
        other => other.map(|n| n.trim().to_string()),
    };
    let picture = match req.profile_picture {
        Some(p) if p.trim().is_empty() => {
            return Err(AppError::validation("Profile picture cannot be empty"))
        }
        other => other.map(|p| p.trim().to_string()),
    };

    current_user(state, user_id).await?;
    let user = state
        .store
        .update_profile(user_id, name.as_deref(), picture.as_deref())
        .await?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}
