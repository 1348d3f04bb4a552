use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use crate::{state::AppState, users::store::StoreError};

/// Failures surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    /// Same message for unknown email and wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email not verified. A new verification link has been sent")]
    EmailNotVerified,
    #[error("Account locked after too many failed login attempts. Reset your password to unlock it")]
    AccountLocked,
    #[error("Invalid verification token")]
    InvalidToken,
    #[error("Invalid identity token")]
    InvalidIdToken,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("{0}")]
    NotFound(String),
    #[error("You cannot use your own referral code")]
    SelfReferral,
    #[error("A referral code has already been applied to this account")]
    AlreadyReferred,
    #[error("{0}")]
    Unauthorized(String),
    #[error("Could not generate a unique referral code")]
    CodeGenerationExhausted,
    #[error("Server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidToken
            | AppError::InvalidOrExpiredToken
            | AppError::SelfReferral
            | AppError::AlreadyReferred => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::EmailNotVerified
            | AppError::AccountLocked
            | AppError::InvalidIdToken
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CodeGenerationExhausted | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::EmailNotVerified => "email_not_verified",
            AppError::AccountLocked => "account_locked",
            AppError::InvalidToken | AppError::InvalidIdToken => "invalid_token",
            AppError::InvalidOrExpiredToken => "invalid_or_expired_token",
            AppError::NotFound(_) => "not_found",
            AppError::SelfReferral => "self_referral",
            AppError::AlreadyReferred => "already_referred",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::CodeGenerationExhausted => "code_generation_exhausted",
            AppError::Internal(_) => "server_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(constraint) => {
                AppError::Conflict(format!("Duplicate value violates {constraint}"))
            }
            StoreError::Backend(e) => AppError::Internal(e),
        }
    }
}

/// Cause of a 500, carried on the response until `internal_detail` decides
/// whether the client may see it.
#[derive(Debug, Clone)]
pub struct InternalDetail {
    body: Value,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        let detail = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                Some(format!("{e:#}"))
            }
            _ => None,
        };

        let mut res = (status, Json(body.clone())).into_response();
        if let Some(detail) = detail {
            res.extensions_mut().insert(InternalDetail { body, detail });
        }
        res
    }
}

/// Appends `detail` to 500 bodies when running in development.
pub async fn internal_detail(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let Some(InternalDetail { mut body, detail }) = res.extensions_mut().remove::<InternalDetail>()
    else {
        return res;
    };
    if state.config.is_production() {
        return res;
    }
    body["detail"] = json!(detail);
    (res.status(), Json(body)).into_response()
}
