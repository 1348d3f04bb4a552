use crate::state::AppState;
use axum::Router;

mod code;
mod dto;
pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::referral_routes()
}
