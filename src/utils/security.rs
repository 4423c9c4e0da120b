//! Security Utilities
//!
//! Password hashing, code generation and hashing helpers.

use bcrypt::{hash, verify, DEFAULT_COST};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Default bcrypt cost for password hashing
pub const DEFAULT_BCRYPT_COST: u32 = DEFAULT_COST;

/// Number of digits in a verification code
pub const VERIFICATION_CODE_LENGTH: usize = 6;

/// Generate a zero-padded numeric verification code
pub fn generate_verification_code() -> String {
    let value = rand::thread_rng().gen_range(0..1_000_000u32);
    format!("{:0width$}", value, width = VERIFICATION_CODE_LENGTH)
}

/// Hash a password with custom bcrypt cost
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

/// Verify a password against its hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// SHA-256 hex digest, used for keying shared-store records by address
pub fn hash_sensitive_data(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Timing-safe string comparison
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_code_shape() {
        for _ in 0..50 {
            let code = generate_verification_code();
            assert_eq!(code.len(), VERIFICATION_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_password_hashing() {
        let hashed = hash_password_with_cost("Abc12345", 4).unwrap();
        assert!(verify_password("Abc12345", &hashed).unwrap());
        assert!(!verify_password("Abc123456", &hashed).unwrap());
    }

    #[test]
    fn test_hash_sensitive_data_is_stable() {
        assert_eq!(
            hash_sensitive_data("a@example.com"),
            hash_sensitive_data("a@example.com")
        );
        assert_ne!(
            hash_sensitive_data("a@example.com"),
            hash_sensitive_data("b@example.com")
        );
        assert_eq!(hash_sensitive_data("x").len(), 64);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("123456", "123456"));
        assert!(!constant_time_compare("123456", "123457"));
        assert!(!constant_time_compare("123456", "12345"));
    }
}
