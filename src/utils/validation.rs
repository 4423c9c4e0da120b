//! Validation Utilities
//!
//! Input validation and normalization for account identifiers and passwords.

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// Validates email address format
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    email.len() <= 254 && regex.is_match(email)
}

/// Normalizes email address to lowercase and removes whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates a phone number: optional leading `+`, then 6 to 20 digits
pub fn validate_phone(phone: &str) -> bool {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+?[0-9]{6,20}$").expect("Failed to compile phone regex"));

    regex.is_match(phone)
}

/// Strips spaces, dashes and parentheses from a phone number
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect()
}

/// Login accepts either an email or a phone number in one field
pub fn is_email_identifier(account: &str) -> bool {
    account.contains('@')
}

/// Password policy: 8 to 128 characters, at least one letter and one digit
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if !(8..=128).contains(&length) {
        return Err(with_message(
            "password_length",
            messages::PASSWORD_LENGTH,
        ));
    }

    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err(with_message("password_letter", messages::PASSWORD_LETTER));
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(with_message("password_digit", messages::PASSWORD_DIGIT));
    }

    Ok(())
}

/// Custom validator for email fields using the validator crate
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(&normalize_email(email)) {
        Ok(())
    } else {
        Err(with_message("invalid_email", messages::INVALID_EMAIL))
    }
}

/// Custom validator for phone fields using the validator crate
pub fn phone_validator(phone: &str) -> Result<(), ValidationError> {
    if validate_phone(&normalize_phone(phone)) {
        Ok(())
    } else {
        Err(with_message("invalid_phone", messages::INVALID_PHONE))
    }
}

fn with_message(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Validation error messages for user-friendly responses
pub mod messages {
    pub const INVALID_EMAIL: &str = "Please enter a valid email address";
    pub const INVALID_PHONE: &str = "Please enter a valid phone number";
    pub const PASSWORD_LENGTH: &str = "Password must be between 8 and 128 characters";
    pub const PASSWORD_LETTER: &str = "Password must contain at least one letter";
    pub const PASSWORD_DIGIT: &str = "Password must contain at least one digit";
    pub const ACCOUNT_REQUIRED: &str = "Either email or phone is required";
}
