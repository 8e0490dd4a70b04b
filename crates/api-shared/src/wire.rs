//! JSON bodies exchanged by the authentication and health endpoints.
//!
//! Entity bodies (patients, visits, ...) are the `medlink-core` models themselves.

use medlink_types::{CardUid, Role};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Username and password login.
#[derive(Clone, Deserialize, Serialize, ToSchema)]
pub struct LoginReq {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginReq")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login by tapping an NFC card at a terminal.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct CardLoginReq {
    #[schema(value_type = String, example = "04A21B7F")]
    pub card_uid: CardUid,
}

/// Login by a fingerprint the terminal's sensor has already matched to a slot.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct FingerprintLoginReq {
    pub slot: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TokenRes {
    pub token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
    pub role: Role,
    pub subject: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ErrorRes {
    pub message: String,
}

impl ErrorRes {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
