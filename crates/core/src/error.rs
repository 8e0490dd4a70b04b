use medlink_types::{CardUidError, NationalIdError, TextError};

#[derive(Debug, thiserror::Error)]
pub enum MedLinkError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("card is not registered")]
    UnknownCard,
    #[error("card or its holder is inactive")]
    InactiveCard,
    #[error("account is no longer active")]
    SessionRevoked,
    #[error("fingerprint is not enrolled")]
    UnknownFingerprint,
    #[error("operation not permitted for this principal")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("failed to create database directory: {0}")]
    DatabaseDirCreation(std::io::Error),
    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize: {0}")]
    Deserialization(serde_json::Error),
    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("invalid text: {0}")]
    Text(#[from] TextError),
    #[error("invalid national id: {0}")]
    NationalId(#[from] NationalIdError),
    #[error("invalid card uid: {0}")]
    CardUid(#[from] CardUidError),
}

impl MedLinkError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            MedLinkError::Database(_)
                | MedLinkError::LockPoisoned
                | MedLinkError::DatabaseDirCreation(_)
                | MedLinkError::FileRead(_)
                | MedLinkError::FileWrite(_)
                | MedLinkError::Serialization(_)
                | MedLinkError::Hardware(_)
        )
    }
}

pub type MedLinkResult<T> = std::result::Result<T, MedLinkError>;
