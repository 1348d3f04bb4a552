use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::instrument;

use super::{
    dto::{
        AuthResponse, EmailRequest, GoogleLoginRequest, LoginRequest, MessageResponse,
        ProfileResponse, PublicUser, RegisterRequest, ResetPasswordRequest, UpdateProfileRequest,
        VerifyEmailResponse,
    },
    extractors::{AuthUser, AUTH_COOKIE},
    jwt::JwtKeys,
    services,
};
use crate::{error::AppError, referral, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify-email/:token", get(verify_email))
        .route("/auth/login", post(login))
        .route("/auth/google", post(google_login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/resend-verification", post(resend_verification))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/profile", put(update_profile))
}

/// httpOnly cookie mirroring the bearer token returned in the body.
fn auth_cookie(state: &AppState, token: &str) -> Cookie<'static> {
    let keys = JwtKeys::from_ref(state);
    Cookie::build((AUTH_COOKIE, token.to_string()))
        .http_only(true)
        .secure(state.config.is_production())
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(keys.ttl_seconds()))
        .build()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "Registration successful. Please check your email to verify your account",
        )),
    ))
}

#[instrument(skip(state, token))]
pub async fn verify_email(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
) -> Result<(CookieJar, Json<VerifyEmailResponse>), AppError> {
    let (user, token) = services::verify_email(&state, &token).await?;
    let jar = jar.add(auth_cookie(&state, &token));
    Ok((
        jar,
        Json(VerifyEmailResponse {
            token,
            id: user.id,
            email: user.email,
            name: user.name,
            is_verified: user.is_verified,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let (user, token) = services::login(&state, payload).await?;
    let jar = jar.add(auth_cookie(&state, &token));
    Ok((
        jar,
        Json(AuthResponse {
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn google_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let (user, token) = services::google_login(&state, payload).await?;
    let jar = jar.add(auth_cookie(&state, &token));
    Ok((
        jar,
        Json(AuthResponse {
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::forgot_password(&state, payload).await?;
    Ok(Json(MessageResponse::new(
        "If an account exists for that email, a password reset link has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::reset_password(&state, payload).await?;
    Ok(Json(MessageResponse::new("Password reset successful")))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::resend_verification(&state, payload).await?;
    Ok(Json(MessageResponse::new(
        "If the account is awaiting verification, a new link has been sent",
    )))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = services::current_user(&state, user_id).await?;
    let user = referral::services::ensure_code(&state, user).await?;
    Ok(Json(ProfileResponse::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = services::update_profile(&state, user_id, payload).await?;
    Ok(Json(ProfileResponse::from(&user)))
}
