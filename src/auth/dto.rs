use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::User;

// Request fields are optional so that missing values surface as our own
// validation errors instead of extractor rejections.

/// Request body for user registration.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest {
    pub id_token: Option<String>,
}

/// Used by forgot-password and resend-verification.
#[derive(Debug, Default, Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub is_verified: bool,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            profile_picture: user.profile_picture.clone(),
            is_verified: user.is_verified,
        }
    }
}

/// Response returned after login and Google sign-in.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

/// Verification logs the user in; the profile is flattened next to the token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailResponse {
    pub token: String,
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub is_verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub is_verified: bool,
    pub referral_code: Option<String>,
    pub referral_points: i32,
    pub referral_count: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            profile_picture: user.profile_picture.clone(),
            is_verified: user.is_verified,
            referral_code: user.referral_code.clone(),
            referral_points: user.referral_points,
            referral_count: user.referral_count,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}
