use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub mod extractors;
pub mod google;
pub mod handlers;
pub mod jwt;
mod password;
pub mod services;
mod tokens;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
