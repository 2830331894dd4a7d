use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument};

use super::{
    cookies::{clear_refresh_cookie, read_cookie, refresh_cookie},
    dto::{
        LoginRequest, LoginResponse, MessageResponse, ProtectedResponse, RefreshResponse,
        RegisterRequest, UserProfile,
    },
    extractors::AuthUser,
};
use crate::{
    error::{AuthError, ValidationReason},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/protected", get(protected))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserProfile>), AuthError> {
    let Json(payload) = payload.map_err(|rejection| {
        debug!(error = %rejection, "register body rejected");
        AuthError::Validation(ValidationReason::InvalidBody)
    })?;
    let profile = state.sessions.register(payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    // An unreadable body fails the same way as bad credentials.
    let Json(payload) = payload.map_err(|_| AuthError::InvalidCredentials)?;
    let out = state.sessions.login(payload).await?;
    let cookie = refresh_cookie(&state.config.refresh, &out.refresh_token)
        .map_err(anyhow::Error::from)?;
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            access_token: out.access_token,
            user: out.user,
        }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let presented = read_cookie(&headers, &state.config.refresh.cookie_name);
    let out = state.sessions.refresh(presented.as_deref()).await?;
    let cookie = refresh_cookie(&state.config.refresh, &out.refresh_token)
        .map_err(anyhow::Error::from)?;
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(RefreshResponse {
            access_token: out.access_token,
        }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let presented = read_cookie(&headers, &state.config.refresh.cookie_name);
    state.sessions.logout(presented.as_deref()).await?;
    // Always clear the cookie, even if no live token was presented.
    let cookie = clear_refresh_cookie(&state.config.refresh).map_err(anyhow::Error::from)?;
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    ))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserProfile>, AuthError> {
    Ok(Json(state.sessions.current_user(user_id).await?))
}

#[instrument]
pub async fn protected(AuthUser(user_id): AuthUser) -> Json<ProtectedResponse> {
    Json(ProtectedResponse {
        message: "You have accessed a protected route",
        user_id,
    })
}
