//! Commitment salt generation.
//!
//! The salt hides the committed reports until the reveal. It is drawn from
//! the OS CSPRNG in `[0, 2^63)` so it round-trips through signed 64-bit
//! integers on the contract tooling side.

use rand::rngs::OsRng;
use rand::Rng;

/// Exclusive upper bound of a salt.
pub const SALT_RANGE: u64 = 1 << 63;

/// Draw a fresh salt in `[0, 2^63)`.
pub fn random_salt() -> u64 {
    OsRng.gen_range(0..SALT_RANGE)
}
