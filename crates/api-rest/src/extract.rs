//! Request extractors: bearer-token principals, terminal authentication, and body/path/query
//! wrappers whose rejections use the common error body.

use crate::error::ApiError;
use crate::AppState;
use api_shared::Claims;
use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use medlink_core::constants::TERMINAL_KEY_HEADER;
use medlink_core::{Actor, AuthService};
use medlink_types::{NationalId, Role};

/// `axum::Json` with rejections rendered as [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Path` with rejections rendered as [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// `axum::extract::Query` with rejections rendered as [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// The verified principal behind a request.
///
/// Extraction fails with 401 when the `Authorization: Bearer` header is missing, malformed,
/// expired or signed with another secret, and when the account behind the token has since been
/// deactivated or deleted.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let user = Self {
            claims: state.tokens.verify(token)?,
        };
        AuthService::new(state.db.clone()).confirm_session(
            user.subject(),
            user.role(),
            user.own_patient().as_ref(),
        )?;
        Ok(user)
    }
}

/// A request sent by one of the clinic's card or fingerprint terminals.
///
/// The terminal proves itself with the pre-shared key in the `X-Terminal-Key` header; a card UID
/// or sensor slot on its own is not a credential.
#[derive(Clone, Copy, Debug)]
pub struct Terminal;

#[async_trait]
impl FromRequestParts<AppState> for Terminal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let key = parts
            .headers
            .get(TERMINAL_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing terminal key"))?;

        if state.cfg.terminal_key_matches(key) {
            Ok(Self)
        } else {
            tracing::warn!("rejected request with a wrong terminal key");
            Err(ApiError::unauthorized("invalid terminal key"))
        }
    }
}

impl AuthUser {
    pub fn role(&self) -> Role {
        self.claims.role
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.claims.sub.clone(), self.claims.role)
    }

    /// National id a patient token is bound to.
    pub fn own_patient(&self) -> Option<NationalId> {
        self.claims
            .patient
            .as_deref()
            .and_then(|id| NationalId::parse(id).ok())
    }

    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.role().is_staff() {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role() == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Staff may read any patient; a patient only themselves.
    pub fn ensure_patient_access(&self, national_id: &NationalId) -> Result<(), ApiError> {
        if self.role().is_staff() || self.own_patient().as_ref() == Some(national_id) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Narrows a list filter: staff keep what they asked for, patients are pinned to their own
    /// records whatever they asked for.
    pub fn scope_patient(
        &self,
        requested: Option<NationalId>,
    ) -> Result<Option<NationalId>, ApiError> {
        if self.role().is_staff() {
            return Ok(requested);
        }
        self.own_patient().map(Some).ok_or_else(ApiError::forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, patient: Option<&str>) -> AuthUser {
        AuthUser {
            claims: Claims {
                sub: "someone".into(),
                role,
                name: "Someone".into(),
                patient: patient.map(str::to_string),
                iat: 0,
                exp: 0,
                jti: "j".into(),
            },
        }
    }

    fn nid(s: &str) -> NationalId {
        NationalId::parse(s).expect("valid national id")
    }

    #[test]
    fn staff_checks() {
        assert!(user(Role::Admin, None).require_admin().is_ok());
        assert!(user(Role::Doctor, None).require_admin().is_err());
        assert!(user(Role::Doctor, None).require_staff().is_ok());
        assert!(user(Role::Patient, None).require_staff().is_err());
    }

    #[test]
    fn patients_only_reach_their_own_record() {
        let mona = user(Role::Patient, Some("29001011234567"));
        assert!(mona.ensure_patient_access(&nid("29001011234567")).is_ok());
        assert!(mona.ensure_patient_access(&nid("30512250100171")).is_err());
        assert!(user(Role::Doctor, None)
            .ensure_patient_access(&nid("30512250100171"))
            .is_ok());
    }

    #[test]
    fn patient_list_scope_is_forced() {
        let mona = user(Role::Patient, Some("29001011234567"));
        let scoped = mona
            .scope_patient(Some(nid("30512250100171")))
            .expect("patient with a record should be scoped");
        assert_eq!(scoped, Some(nid("29001011234567")));

        assert!(user(Role::Patient, None).scope_patient(None).is_err());
        assert_eq!(user(Role::Admin, None).scope_patient(None).unwrap(), None);
    }
}
