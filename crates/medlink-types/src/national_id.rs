//! Egyptian national identifiers.
//!
//! A national ID is the patient primary key throughout MedLink. It is 14 digits laid out as:
//!
//! ```text
//! C YYMMDD GG SSSS K
//! │ │      │  │    └─ check digit
//! │ │      │  └────── registration sequence (4th digit odd = male, even = female)
//! │ │      └───────── governorate of birth
//! │ └──────────────── date of birth
//! └────────────────── century (2 = 1900s, 3 = 2000s)
//! ```
//!
//! Parsing validates the structure (digits, century, calendar date and governorate code) so that
//! the birth date and gender can be derived from any constructed value without further checks.

use crate::Gender;
use chrono::NaiveDate;
use std::{fmt, str::FromStr};

/// Governorate codes issued by the Civil Registry. `88` marks citizens born abroad.
const GOVERNORATE_CODES: &[u8] = &[
    1, 2, 3, 4, 11, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 24, 25, 26, 27, 28, 29, 31, 32,
    33, 34, 35, 88,
];

/// Number of digits in a national ID.
const NATIONAL_ID_LEN: usize = 14;

/// Errors produced when parsing a national ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NationalIdError {
    #[error("national id must be exactly 14 digits, got {0} characters")]
    Length(usize),
    #[error("national id must contain digits only")]
    NonDigit,
    #[error("national id century digit must be 2 or 3, got {0}")]
    Century(char),
    #[error("national id encodes an invalid birth date")]
    BirthDate,
    #[error("national id encodes an unknown governorate code {0:02}")]
    Governorate(u8),
}

/// A structurally valid Egyptian national identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::ToSchema),
    schema(example = "29001011234567")
)]
pub struct NationalId(String);

impl NationalId {
    /// Parses and validates a national ID.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`NationalIdError`] describing the first structural problem found.
    pub fn parse(input: &str) -> Result<Self, NationalIdError> {
        let value = input.trim();

        let len = value.chars().count();
        if len != NATIONAL_ID_LEN {
            return Err(NationalIdError::Length(len));
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NationalIdError::NonDigit);
        }

        let bytes = value.as_bytes();
        let century = match bytes[0] {
            b'2' => 1900,
            b'3' => 2000,
            other => return Err(NationalIdError::Century(other as char)),
        };

        let year = century + i32::from(two_digits(bytes, 1));
        let month = u32::from(two_digits(bytes, 3));
        let day = u32::from(two_digits(bytes, 5));
        if NaiveDate::from_ymd_opt(year, month, day).is_none() {
            return Err(NationalIdError::BirthDate);
        }

        let governorate = two_digits(bytes, 7);
        if !GOVERNORATE_CODES.contains(&governorate) {
            return Err(NationalIdError::Governorate(governorate));
        }

        Ok(Self(value.to_owned()))
    }

    /// Returns the national ID as its 14-digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Date of birth encoded in digits 1–7.
    pub fn birth_date(&self) -> NaiveDate {
        let bytes = self.0.as_bytes();
        let century = if bytes[0] == b'2' { 1900 } else { 2000 };
        let year = century + i32::from(two_digits(bytes, 1));
        let month = u32::from(two_digits(bytes, 3));
        let day = u32::from(two_digits(bytes, 5));
        // Validated in `parse`.
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
    }

    /// Gender encoded in the 13th digit.
    pub fn gender(&self) -> Gender {
        let digit = self.0.as_bytes()[12] - b'0';
        if digit % 2 == 1 {
            Gender::Male
        } else {
            Gender::Female
        }
    }

    /// Governorate of birth (digits 8–9).
    pub fn governorate_code(&self) -> u8 {
        two_digits(self.0.as_bytes(), 7)
    }

    /// Builds a national ID from its components.
    ///
    /// Used by data generators; the result is validated like any parsed input.
    ///
    /// # Errors
    ///
    /// Returns a [`NationalIdError`] if the components do not form a valid identifier
    /// (for example a birth year outside 1900–2099 or an unknown governorate).
    pub fn compose(
        birth_date: NaiveDate,
        governorate: u8,
        sequence: u16,
        gender: Gender,
        check_digit: u8,
    ) -> Result<Self, NationalIdError> {
        use chrono::Datelike;

        let year = birth_date.year();
        let century = match year {
            1900..=1999 => '2',
            2000..=2099 => '3',
            _ => return Err(NationalIdError::BirthDate),
        };

        // Force the gender digit (last digit of the sequence) to the right parity.
        let mut sequence = sequence % 10_000;
        let odd = sequence % 2 == 1;
        if odd != (gender == Gender::Male) {
            sequence = if sequence == 9_999 { 9_998 } else { sequence + 1 };
        }

        let raw = format!(
            "{century}{:02}{:02}{:02}{:02}{:04}{}",
            year % 100,
            birth_date.month(),
            birth_date.day(),
            governorate,
            sequence,
            check_digit % 10
        );
        Self::parse(&raw)
    }
}

fn two_digits(bytes: &[u8], at: usize) -> u8 {
    (bytes[at] - b'0') * 10 + (bytes[at + 1] - b'0')
}

impl fmt::Display for NationalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NationalId {
    type Err = NationalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for NationalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NationalId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NationalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NationalId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_valid_id_and_derives_fields() {
        let id = NationalId::parse("29001011234567").expect("valid national id");
        assert_eq!(id.birth_date(), NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        assert_eq!(id.governorate_code(), 12);
        assert_eq!(id.gender(), Gender::Female);
    }

    #[test]
    fn parse_reads_gender_from_thirteenth_digit() {
        let id = NationalId::parse("30512250100171").expect("valid national id");
        assert_eq!(id.gender(), Gender::Male);
        assert_eq!(id.birth_date(), NaiveDate::from_ymd_opt(2005, 12, 25).unwrap());
    }

    #[test]
    fn parse_trims_whitespace() {
        let id = NationalId::parse(" 29001011234567\n").expect("padded id should parse");
        assert_eq!(id.as_str(), "29001011234567");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            NationalId::parse("2900101123456"),
            Err(NationalIdError::Length(13))
        );
    }

    #[test]
    fn parse_rejects_letters() {
        assert_eq!(
            NationalId::parse("2900101123456X"),
            Err(NationalIdError::NonDigit)
        );
    }

    #[test]
    fn parse_rejects_unknown_century() {
        assert_eq!(
            NationalId::parse("19001011234567"),
            Err(NationalIdError::Century('1'))
        );
    }

    #[test]
    fn parse_rejects_impossible_dates() {
        // 1990-02-30
        assert_eq!(
            NationalId::parse("29002301234567"),
            Err(NationalIdError::BirthDate)
        );
        // 1900 was not a leap year
        assert_eq!(
            NationalId::parse("20002291234567"),
            Err(NationalIdError::BirthDate)
        );
    }

    #[test]
    fn parse_rejects_unknown_governorate() {
        assert_eq!(
            NationalId::parse("29001019934567"),
            Err(NationalIdError::Governorate(99))
        );
    }

    #[test]
    fn compose_produces_consistent_id() {
        let dob = NaiveDate::from_ymd_opt(1984, 7, 9).unwrap();
        let id = NationalId::compose(dob, 21, 42, Gender::Male, 3).expect("compose should succeed");
        assert_eq!(id.birth_date(), dob);
        assert_eq!(id.gender(), Gender::Male);
        assert_eq!(id.governorate_code(), 21);

        let id = NationalId::compose(dob, 21, 42, Gender::Female, 3).expect("compose should succeed");
        assert_eq!(id.gender(), Gender::Female);
    }

    #[test]
    fn compose_rejects_out_of_range_year() {
        let dob = NaiveDate::from_ymd_opt(1850, 1, 1).unwrap();
        assert_eq!(
            NationalId::compose(dob, 1, 1, Gender::Male, 0),
            Err(NationalIdError::BirthDate)
        );
    }
}
