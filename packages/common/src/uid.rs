//! Identifiers for images, collections and jobs.
//!
//! A UID is 24 characters drawn from the base62 alphabet. 24 base62 digits
//! carry ~142 bits, so random generation is collision free in practice.

use rand::Rng;

/// Length of every generated UID.
pub const UID_LEN: usize = 24;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a fresh random UID.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..UID_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Returns true if `s` has the shape of a UID.
///
/// Handlers use this before touching the filesystem so that a path segment
/// can never escape the library root.
pub fn is_valid(s: &str) -> bool {
    s.len() == UID_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}
