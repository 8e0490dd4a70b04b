//! NFC card identifiers.
//!
//! Readers report UIDs in several spellings (`04:A2:1B:7F`, `04a21b7f`, `04-A2-1B-7F`). MedLink
//! stores a single canonical form: uppercase hexadecimal without separators. Only the UID sizes
//! defined by ISO/IEC 14443-3 (4, 7 and 10 bytes) are accepted.

use std::{fmt, str::FromStr};

/// UID sizes in bytes permitted by ISO/IEC 14443-3.
const UID_SIZES: [usize; 3] = [4, 7, 10];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardUidError {
    #[error("card uid cannot be empty")]
    Empty,
    #[error("card uid contains a non-hexadecimal character '{0}'")]
    NonHex(char),
    #[error("card uid must be 4, 7 or 10 bytes, got {0} hex digits")]
    Size(usize),
}

/// Canonical NFC card UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::ToSchema),
    schema(example = "04A21B7F")
)]
pub struct CardUid(String);

impl CardUid {
    /// Parses a UID, ignoring `:`, `-` and whitespace separators and letter case.
    pub fn parse(input: &str) -> Result<Self, CardUidError> {
        let mut canonical = String::with_capacity(input.len());
        for c in input.chars() {
            if c == ':' || c == '-' || c.is_whitespace() {
                continue;
            }
            if !c.is_ascii_hexdigit() {
                return Err(CardUidError::NonHex(c));
            }
            canonical.push(c.to_ascii_uppercase());
        }

        if canonical.is_empty() {
            return Err(CardUidError::Empty);
        }
        if canonical.len() % 2 != 0 || !UID_SIZES.contains(&(canonical.len() / 2)) {
            return Err(CardUidError::Size(canonical.len()));
        }

        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UID length in bytes.
    pub fn byte_len(&self) -> usize {
        self.0.len() / 2
    }
}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CardUid {
    type Err = CardUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for CardUid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for CardUid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CardUid::parse(&s).map_err(serde::de::Error::custom)
    }
}
