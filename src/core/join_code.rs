//! Join Code Generation
//!
//! Short, human-enterable lobby codes. Codes are time-derived: the current
//! wall clock in milliseconds rendered in base 36, keeping the low-order
//! digits so consecutive lobbies get distinct codes. The code space wraps
//! roughly every 25 days, so callers must still retry on collision.

use chrono::Utc;

/// Alphabet for join codes (base 36, upper case).
pub const JOIN_CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Default join code length.
pub const JOIN_CODE_LENGTH: usize = 6;

/// Render the low-order `length` base-36 digits of `value`.
pub fn encode_base36(mut value: u64, length: usize) -> String {
    let base = JOIN_CODE_ALPHABET.len() as u64;
    let mut digits = vec![b'0'; length];

    for slot in digits.iter_mut().rev() {
        *slot = JOIN_CODE_ALPHABET[(value % base) as usize];
        value /= base;
    }

    // Alphabet is ASCII
    String::from_utf8_lossy(&digits).into_owned()
}

/// Candidate join code for the given allocation attempt.
///
/// The attempt number is added to the clock so retries inside the same
/// millisecond still produce fresh candidates.
pub fn time_derived_code(attempt: u32, length: usize) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    encode_base36(millis.wrapping_add(attempt as u64), length)
}

/// Normalize user input: trim and upper-case.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether `code` is `length` characters of the join-code alphabet.
pub fn is_well_formed(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b))
}
