//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_DATABASE_PATH, DEFAULT_TOKEN_TTL_MINUTES, MIN_JWT_SECRET_LEN, MIN_TERMINAL_KEY_LEN,
};
use crate::{MedLinkError, MedLinkResult};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

/// Core configuration resolved at startup.
#[derive(Clone)]
pub struct CoreConfig {
    database_path: PathBuf,
    jwt_secret: String,
    terminal_key: String,
    token_ttl_minutes: u32,
    card_reader_device: Option<PathBuf>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"<redacted>")
            .field("terminal_key", &"<redacted>")
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("card_reader_device", &self.card_reader_device)
            .finish()
    }
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError::InvalidInput` if:
    /// - the JWT secret is shorter than [`MIN_JWT_SECRET_LEN`] bytes
    /// - the terminal key is shorter than [`MIN_TERMINAL_KEY_LEN`] bytes
    /// - the token lifetime is zero
    pub fn new(
        database_path: PathBuf,
        jwt_secret: String,
        terminal_key: String,
        token_ttl_minutes: u32,
        card_reader_device: Option<PathBuf>,
    ) -> MedLinkResult<Self> {
        if jwt_secret.trim().len() < MIN_JWT_SECRET_LEN {
            return Err(MedLinkError::InvalidInput(format!(
                "jwt secret must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }
        if terminal_key.trim().len() < MIN_TERMINAL_KEY_LEN {
            return Err(MedLinkError::InvalidInput(format!(
                "terminal key must be at least {} bytes",
                MIN_TERMINAL_KEY_LEN
            )));
        }
        if token_ttl_minutes == 0 {
            return Err(MedLinkError::InvalidInput(
                "token lifetime must be at least one minute".into(),
            ));
        }

        Ok(Self {
            database_path,
            jwt_secret,
            terminal_key,
            token_ttl_minutes,
            card_reader_device,
        })
    }

    /// Resolve configuration from the process environment.
    ///
    /// Reads `MEDLINK_DATABASE`, `MEDLINK_JWT_SECRET`, `MEDLINK_TERMINAL_KEY`,
    /// `MEDLINK_TOKEN_TTL_MINUTES` and `MEDLINK_CARD_READER`. Call once at startup, after loading
    /// any `.env` file.
    pub fn from_env() -> MedLinkResult<Self> {
        let database_path = database_path_from_env_value(std::env::var("MEDLINK_DATABASE").ok());
        let jwt_secret = std::env::var("MEDLINK_JWT_SECRET").map_err(|_| {
            MedLinkError::InvalidInput("MEDLINK_JWT_SECRET must be set".into())
        })?;
        let terminal_key = std::env::var("MEDLINK_TERMINAL_KEY").map_err(|_| {
            MedLinkError::InvalidInput("MEDLINK_TERMINAL_KEY must be set".into())
        })?;
        let ttl = token_ttl_from_env_value(std::env::var("MEDLINK_TOKEN_TTL_MINUTES").ok())?;
        let reader = non_empty(std::env::var("MEDLINK_CARD_READER").ok()).map(PathBuf::from);

        Self::new(database_path, jwt_secret, terminal_key, ttl, reader)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// Whether `provided` is the key shared with the clinic's card and fingerprint terminals.
    ///
    /// The comparison takes the same time wherever the first differing byte is.
    pub fn terminal_key_matches(&self, provided: &str) -> bool {
        self.terminal_key.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    pub fn token_ttl_minutes(&self) -> u32 {
        self.token_ttl_minutes
    }

    pub fn card_reader_device(&self) -> Option<&Path> {
        self.card_reader_device.as_deref()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the database path from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_DATABASE_PATH`].
pub fn database_path_from_env_value(value: Option<String>) -> PathBuf {
    non_empty(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
}

/// Parse the token lifetime (minutes) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_TOKEN_TTL_MINUTES`].
pub fn token_ttl_from_env_value(value: Option<String>) -> MedLinkResult<u32> {
    match non_empty(value) {
        None => Ok(DEFAULT_TOKEN_TTL_MINUTES),
        Some(v) => v.parse::<u32>().map_err(|_| {
            MedLinkError::InvalidInput(format!("token lifetime must be a whole number, got '{v}'"))
        }),
    }
}
