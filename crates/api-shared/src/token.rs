//! Signed access tokens.
//!
//! Every successful login (password, card or fingerprint) yields an HS256 JWT carrying the
//! principal's subject and role. The REST layer verifies the token on each request instead of
//! keeping server-side sessions.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use medlink_types::Role;
use serde::{Deserialize, Serialize};

/// Clock skew tolerated when checking `exp`, in seconds.
const LEEWAY_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is invalid")]
    Invalid,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}

/// JWT payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct Claims {
    /// Username for staff, national id for patients.
    pub sub: String,
    pub role: Role,
    /// Display name of the principal.
    pub name: String,
    /// National id whose records a patient token may read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Who a token is being issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSubject {
    pub subject: String,
    pub role: Role,
    pub name: String,
    pub patient: Option<String>,
}

/// Issues and verifies access tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    pub fn new(secret: &str, ttl_minutes: u32) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(i64::from(ttl_minutes)),
        }
    }

    /// Lifetime of newly issued tokens, in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.num_seconds().max(0) as u64
    }

    /// Signs a token for `subject` valid from now.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encoding`] if signing fails.
    pub fn issue(&self, subject: &TokenSubject) -> Result<String, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    fn issue_at(&self, subject: &TokenSubject, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.subject.clone(),
            role: subject.role,
            name: subject.name.clone(),
            patient: subject.patient.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Encoding)
    }

    /// Checks the signature and expiry of `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Expired`] if `exp` has passed
    /// - [`TokenError::Invalid`] for any other failure (bad signature, malformed token)
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!("rejected token: {}", e);
                    TokenError::Invalid
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "an-unremarkable-test-secret-of-40-bytes!";

    fn doctor() -> TokenSubject {
        TokenSubject {
            subject: "dr.house".into(),
            role: Role::Doctor,
            name: "Gregory House".into(),
            patient: None,
        }
    }

    #[test]
    fn issued_token_verifies() {
        let tokens = TokenService::new(SECRET, 60);
        let token = tokens.issue(&doctor()).expect("issue should succeed");

        let claims = tokens.verify(&token).expect("verify should succeed");
        assert_eq!(claims.sub, "dr.house");
        assert_eq!(claims.role, Role::Doctor);
        assert_eq!(claims.patient, None);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn patient_claim_survives_round_trip() {
        let tokens = TokenService::new(SECRET, 5);
        let subject = TokenSubject {
            subject: "29001011234567".into(),
            role: Role::Patient,
            name: "Mona Adel".into(),
            patient: Some("29001011234567".into()),
        };
        let claims = tokens
            .verify(&tokens.issue(&subject).expect("issue should succeed"))
            .expect("verify should succeed");
        assert_eq!(claims.patient.as_deref(), Some("29001011234567"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new(SECRET, 1);
        let token = tokens
            .issue_at(&doctor(), Utc::now() - Duration::hours(2))
            .expect("issue should succeed");
        assert!(matches!(tokens.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn token_from_another_secret_is_invalid() {
        let ours = TokenService::new(SECRET, 60);
        let theirs = TokenService::new("a-different-secret-that-is-long-enough!!", 60);
        let token = theirs.issue(&doctor()).expect("issue should succeed");
        assert!(matches!(ours.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn garbage_is_invalid() {
        let tokens = TokenService::new(SECRET, 60);
        assert!(matches!(tokens.verify("not.a.jwt"), Err(TokenError::Invalid)));
        assert!(matches!(tokens.verify(""), Err(TokenError::Invalid)));
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", TokenService::new(SECRET, 60));
        assert!(!rendered.contains(SECRET));
    }
}
