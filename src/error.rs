use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::{jwt::TokenError, refresh::RefreshError};
use crate::store::StoreError;

/// Machine-readable reason attached to 400 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    InvalidBody,
    MissingFields,
    InvalidEmail,
    WeakPassword,
    InvalidDisplayName,
}

impl ValidationReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidBody => "Malformed request body",
            Self::MissingFields => "Missing required fields",
            Self::InvalidEmail => "Invalid email format",
            Self::WeakPassword => "Password does not meet security requirements",
            Self::InvalidDisplayName => "Invalid display name",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed: {0:?}")]
    Validation(ValidationReason),

    #[error("email already in use")]
    Conflict,

    /// Unknown email and wrong password share this variant on purpose.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("missing refresh token")]
    MissingRefresh,

    #[error("invalid refresh token")]
    InvalidRefresh,

    #[error("compromised session")]
    CompromisedSession,

    #[error("user not found")]
    NotFound,

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<ValidationReason>,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::InvalidCredentials
            | Self::Unauthorized(_)
            | Self::MissingRefresh
            | Self::InvalidRefresh
            | Self::CompromisedSession => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Infrastructure detail never leaves here.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(reason) => reason.message(),
            Self::Conflict => "Email already in use",
            Self::InvalidCredentials => "Invalid email or password",
            Self::Unauthorized(msg) => *msg,
            Self::MissingRefresh => "Missing refresh token",
            Self::InvalidRefresh => "Invalid refresh token",
            Self::CompromisedSession => "Session compromised. Please log in again.",
            Self::NotFound => "User not found",
            Self::Infrastructure(_) => "Internal server error",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => Self::Conflict,
            other => Self::Infrastructure(other.into()),
        }
    }
}

impl From<RefreshError> for AuthError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::Invalid => Self::InvalidRefresh,
            RefreshError::Compromised { .. } => Self::CompromisedSession,
            RefreshError::Store(e) => Self::Infrastructure(e.into()),
            e @ RefreshError::ExpiryOutOfRange => Self::Infrastructure(e.into()),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::Unauthorized("Access token expired"),
            TokenError::Invalid => Self::Unauthorized("Invalid access token"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Infrastructure(e) => error!(error = ?e, "request failed"),
            Self::CompromisedSession => warn!("rejected compromised refresh token"),
            _ => {}
        }
        let reason = match &self {
            Self::Validation(r) => Some(*r),
            _ => None,
        };
        let body = ErrorBody {
            error: self.public_message(),
            reason,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            AuthError::Validation(ValidationReason::InvalidEmail).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidRefresh.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::CompromisedSession.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::Infrastructure(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn infrastructure_detail_is_not_exposed() {
        let err = AuthError::Infrastructure(anyhow::anyhow!("connection refused at 10.0.0.5"));
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn refresh_errors_map_to_distinct_internal_variants() {
        assert!(matches!(
            AuthError::from(RefreshError::Invalid),
            AuthError::InvalidRefresh
        ));
        assert!(matches!(
            AuthError::from(RefreshError::Compromised {
                user_id: uuid::Uuid::new_v4()
            }),
            AuthError::CompromisedSession
        ));
    }

    #[test]
    fn expiry_overflow_is_infrastructure() {
        let err = AuthError::from(RefreshError::ExpiryOutOfRange);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn duplicate_email_maps_to_conflict() {
        assert!(matches!(
            AuthError::from(StoreError::DuplicateEmail),
            AuthError::Conflict
        ));
    }
}
