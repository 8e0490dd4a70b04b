//! Input validation utilities.
//!
//! This module contains functions for validating user inputs to ensure they meet
//! safety and correctness requirements before being written to the database.

use crate::constants::{BLOOD_TYPES, MIN_PASSWORD_LEN};
use crate::{MedLinkError, MedLinkResult};

/// Normalises and validates a blood group (`a+` → `A+`).
///
/// # Errors
///
/// Returns `MedLinkError::InvalidInput` unless the value is one of [`BLOOD_TYPES`].
pub fn normalise_blood_type(value: &str) -> MedLinkResult<String> {
    let upper = value.trim().to_ascii_uppercase();
    if BLOOD_TYPES.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(MedLinkError::InvalidInput(format!(
            "blood type must be one of {}",
            BLOOD_TYPES.join(", ")
        )))
    }
}

/// Validates a phone number: optional leading `+`, then 7 to 15 digits with optional spaces or
/// dashes between them. Returns the number with separators removed.
pub fn normalise_phone(value: &str) -> MedLinkResult<String> {
    let trimmed = value.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => {
                return Err(MedLinkError::InvalidInput(
                    "phone number may contain only digits, spaces, '-' and a leading '+'".into(),
                ))
            }
        }
    }

    if !(7..=15).contains(&digits.len()) {
        return Err(MedLinkError::InvalidInput(
            "phone number must have between 7 and 15 digits".into(),
        ));
    }

    Ok(format!("{plus}{digits}"))
}

/// Validates a login name: 3–32 characters of lowercase ASCII letters, digits, `.`, `_`, `-`.
pub fn validate_username(value: &str) -> MedLinkResult<()> {
    const MIN_LEN: usize = 3;
    const MAX_LEN: usize = 32;

    if !(MIN_LEN..=MAX_LEN).contains(&value.len()) {
        return Err(MedLinkError::InvalidInput(format!(
            "username must be between {MIN_LEN} and {MAX_LEN} characters"
        )));
    }

    let ok = value
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'.' | b'-' | b'_'));
    if !ok {
        return Err(MedLinkError::InvalidInput(
            "username contains invalid characters (only lowercase alphanumeric, '.', '-', '_' allowed)"
                .into(),
        ));
    }

    Ok(())
}

pub fn validate_password(value: &str) -> MedLinkResult<()> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(MedLinkError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Minimal structural email check: one `@` with non-empty local part and a dotted domain.
pub fn validate_email(value: &str) -> MedLinkResult<()> {
    let invalid = || MedLinkError::InvalidInput(format!("invalid email address '{value}'"));

    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || value.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blood_type_is_normalised() {
        assert_eq!(normalise_blood_type(" ab- ").unwrap(), "AB-");
        assert!(normalise_blood_type("C+").is_err());
    }

    #[test]
    fn phone_strips_separators() {
        assert_eq!(normalise_phone("+20 100-123-4567").unwrap(), "+201001234567");
        assert_eq!(normalise_phone("01001234567").unwrap(), "01001234567");
        assert!(normalise_phone("12345").is_err());
        assert!(normalise_phone("0100 CALL ME").is_err());
    }

    #[test]
    fn username_rules() {
        validate_username("dr.salma_1").expect("valid username");
        assert!(validate_username("ab").is_err());
        assert!(validate_username("Dr.Salma").is_err());
        assert!(validate_username("dr salma").is_err());
    }

    #[test]
    fn password_minimum_length() {
        assert!(validate_password("short").is_err());
        validate_password("long enough").expect("valid password");
    }

    #[test]
    fn email_rules() {
        validate_email("salma@clinic.eg").expect("valid email");
        assert!(validate_email("salma.clinic.eg").is_err());
        assert!(validate_email("@clinic.eg").is_err());
        assert!(validate_email("salma@clinic").is_err());
        assert!(validate_email("sal ma@clinic.eg").is_err());
    }
}
