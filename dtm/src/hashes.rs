use crate::error::{DtmError, Result};

/// Number of characters in a version hash.
pub const HASH_LEN: usize = 8;

/// How many fresh hashes we draw before giving up on finding an unused one.
pub const MAX_HASH_ATTEMPTS: usize = 10;

/// A random version identifier: 4 bytes from the thread-local CSPRNG rendered as
/// 8 lowercase hex characters. It says nothing about the content it names.
pub fn random_hash() -> String {
    let bytes: [u8; 4] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether `s` has the shape of a version hash.
pub fn is_version_hash(s: &str) -> bool {
    s.len() == HASH_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Draws hashes from `generate` until one is not `taken`.
pub(crate) fn unique_hash_with(
    mut generate: impl FnMut() -> String,
    taken: impl Fn(&str) -> bool,
) -> Result<String> {
    for attempt in 1..=MAX_HASH_ATTEMPTS {
        let candidate = generate();
        if !taken(&candidate) {
            return Ok(candidate);
        }
        log::debug!("Hash {candidate} already in use (attempt {attempt})");
    }
    Err(DtmError::internal(format!(
        "failed to generate an unused version hash after {MAX_HASH_ATTEMPTS} attempts"
    )))
}

/// Generates a random hash not already `taken`.
pub fn unique_hash(taken: impl Fn(&str) -> bool) -> Result<String> {
    unique_hash_with(random_hash, taken)
}
