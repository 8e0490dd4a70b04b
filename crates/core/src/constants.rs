//! Constants used throughout the MedLink core crate.

/// Default SQLite database file when no explicit path is configured.
pub const DEFAULT_DATABASE_PATH: &str = "medlink.db";

/// Default lifetime of issued access tokens, in minutes (one clinic shift).
pub const DEFAULT_TOKEN_TTL_MINUTES: u32 = 480;

/// Minimum accepted length of the JWT signing secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Minimum accepted length of the key card and fingerprint terminals present, in bytes.
pub const MIN_TERMINAL_KEY_LEN: usize = 16;

/// Header carrying the terminal key on card and fingerprint logins.
pub const TERMINAL_KEY_HEADER: &str = "x-terminal-key";

/// Page size used when a search does not specify a limit.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on any single search page.
pub const MAX_PAGE_SIZE: u32 = 500;

/// PBKDF2-HMAC-SHA256 rounds applied to passwords.
pub const PASSWORD_HASH_ITERATIONS: u32 = 100_000;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Identifier recorded in the audit log for tooling-driven changes.
pub const SYSTEM_ACTOR: &str = "system";

/// ABO/Rh blood groups accepted on patient records.
pub const BLOOD_TYPES: &[&str] = &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

/// Template slots available on the fingerprint sensor (`0..FINGERPRINT_SLOTS`).
pub const FINGERPRINT_SLOTS: u16 = 1000;
