//! # API Shared
//!
//! Shared utilities and definitions for MedLink APIs.
//!
//! Contains:
//! - Request/response wire types (`wire` module)
//! - Shared services like `HealthService`
//! - Access token issuing and verification (`TokenService`)
//!
//! Used by `api-rest` and by the workspace binary.

pub mod health;
pub mod token;
pub mod wire;

pub use health::HealthService;
pub use token::{Claims, TokenError, TokenService, TokenSubject};
pub use wire::*;
