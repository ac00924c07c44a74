//! # oracle-crypto
//!
//! Cryptographic primitives for the commit-reveal price vote.
//!
//! The on-chain verifier recomputes `keccak256(abi.encode(reports, salt,
//! sender))` when a vote is revealed. Any difference in field order, integer
//! widths or padding produces a different hash and the reveal is slashed as
//! invalid, so the encoding here is fixed and checked at startup.
//!
//! ## Modules
//!
//! - [`commitment`] — ABI schema, commitment hash, price-to-report scaling
//! - [`salt`] — commitment salt generation

pub mod commitment;
pub mod salt;

pub use commitment::{report_from_price, CommitmentHashComputer};
pub use salt::random_salt;

/// Error types for commitment operations.
#[derive(Debug, thiserror::Error)]
pub enum CommitmentError {
    /// The scaled price does not fit the on-chain `uint120`.
    #[error("price {value} of {symbol} does not fit uint120")]
    PriceOverflow {
        /// Symbol of the offending price.
        symbol: String,
        /// Decimal value before scaling.
        value: String,
    },

    /// Negative prices cannot be reported.
    #[error("negative price {value} for {symbol}")]
    NegativePrice {
        /// Symbol of the offending price.
        symbol: String,
        /// Decimal value.
        value: String,
    },

    /// Confidence outside `0..=100`.
    #[error("confidence {0} out of range")]
    InvalidConfidence(u8),

    /// The ABI schema does not reproduce the reference commitment.
    #[error("commitment schema self-check failed: expected {expected}, got {actual}")]
    Schema {
        /// Reference hash.
        expected: String,
        /// Hash produced by the loaded schema.
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, CommitmentError>;
