//! # MedLink Types
//!
//! Validated value types shared by every MedLink crate.
//!
//! Once constructed, each type guarantees its invariant, so services and API handlers can
//! accept them without re-validating:
//! - [`NonEmptyText`]: trimmed, non-empty text
//! - [`NationalId`]: a structurally valid Egyptian national identifier (patient primary key)
//! - [`CardUid`]: an NFC card UID in canonical uppercase-hex form
//! - [`Role`] and [`Gender`]: closed vocabularies stored as lowercase text

mod card_uid;
mod national_id;
mod role;
mod text;

pub use card_uid::{CardUid, CardUidError};
pub use national_id::{NationalId, NationalIdError};
pub use role::{Gender, ParseEnumError, Role};
pub use text::{NonEmptyText, TextError};
