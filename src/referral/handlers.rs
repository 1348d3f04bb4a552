use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{ApplyReferralRequest, PointsAwarded, PointsBalance, ReferralInfo},
    services,
};
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn referral_routes() -> Router<AppState> {
    Router::new()
        .route("/referral", get(get_referral))
        .route("/referral/apply", post(apply_referral))
        .route("/referral/share", post(share))
        .route("/referral/points", get(get_points))
}

#[instrument(skip(state))]
pub async fn get_referral(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ReferralInfo>, AppError> {
    let user = services::referral_info(&state, user_id).await?;
    let referral_code = user.referral_code.unwrap_or_default();
    Ok(Json(ReferralInfo {
        referral_link: state.config.referral_link(&referral_code),
        referral_code,
        referral_points: user.referral_points,
        referral_count: user.referral_count,
        referred_by: user.referred_by,
    }))
}

#[instrument(skip(state, payload))]
pub async fn apply_referral(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ApplyReferralRequest>,
) -> Result<Json<PointsAwarded>, AppError> {
    let user = services::apply(&state, user_id, payload).await?;
    Ok(Json(PointsAwarded {
        message: "Referral code applied".into(),
        referral_points: user.referral_points,
    }))
}

#[instrument(skip(state))]
pub async fn share(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PointsAwarded>, AppError> {
    let user = services::share(&state, user_id).await?;
    Ok(Json(PointsAwarded {
        message: "Thanks for sharing".into(),
        referral_points: user.referral_points,
    }))
}

#[instrument(skip(state))]
pub async fn get_points(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PointsBalance>, AppError> {
    let user = crate::auth::services::current_user(&state, user_id).await?;
    Ok(Json(PointsBalance {
        referral_points: user.referral_points,
        referral_count: user.referral_count,
    }))
}
