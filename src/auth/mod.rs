use crate::state::AppState;
use axum::Router;

mod cookies;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod refresh;
pub mod session;
pub mod validators;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::protected_routes())
}
