//! Mapping of core errors onto HTTP responses.

use api_shared::{ErrorRes, TokenError};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use medlink_core::MedLinkError;

pub type ApiResult<T> = Result<T, ApiError>;

/// An error ready to be rendered as `{"message": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, MedLinkError::Forbidden.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    }
}

impl From<MedLinkError> for ApiError {
    fn from(e: MedLinkError) -> Self {
        let status = match &e {
            MedLinkError::InvalidInput(_)
            | MedLinkError::Text(_)
            | MedLinkError::NationalId(_)
            | MedLinkError::CardUid(_) => StatusCode::BAD_REQUEST,
            MedLinkError::InvalidCredentials
            | MedLinkError::UnknownCard
            | MedLinkError::UnknownFingerprint
            | MedLinkError::InactiveCard
            | MedLinkError::SessionRevoked => StatusCode::UNAUTHORIZED,
            MedLinkError::Forbidden => StatusCode::FORBIDDEN,
            MedLinkError::NotFound { .. } => StatusCode::NOT_FOUND,
            MedLinkError::Conflict(_) => StatusCode::CONFLICT,
            _ => {
                tracing::error!("request failed: {:?}", e);
                return Self::internal();
            }
        };
        Self::new(status, e.to_string())
    }
}

// Extractor rejections keep axum's status code and text but use the common body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired | TokenError::Invalid => Self::unauthorized(e.to_string()),
            TokenError::Encoding(_) => {
                tracing::error!("token signing failed: {:?}", e);
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorRes::new(self.message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::from(MedLinkError::Conflict("username 'a' is taken".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message, "conflict: username 'a' is taken");

        let err = ApiError::from(MedLinkError::NotFound {
            entity: "patient",
            id: "1".into(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn credential_errors_are_unauthorised() {
        for e in [
            MedLinkError::InvalidCredentials,
            MedLinkError::UnknownCard,
            MedLinkError::InactiveCard,
            MedLinkError::UnknownFingerprint,
            MedLinkError::SessionRevoked,
        ] {
            assert_eq!(ApiError::from(e).status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(
            ApiError::from(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = ApiError::from(MedLinkError::LockPoisoned);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal error");
    }
}
