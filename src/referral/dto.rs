use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReferralRequest {
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralInfo {
    pub referral_code: String,
    pub referral_link: String,
    pub referral_points: i32,
    pub referral_count: i32,
    pub referred_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsAwarded {
    pub message: String,
    pub referral_points: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsBalance {
    pub referral_points: i32,
    pub referral_count: i32,
}
