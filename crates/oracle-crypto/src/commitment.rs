//! Commitment hash over `abi.encode(Report[], uint256 salt, address sender)`.
//!
//! The on-chain struct is `Report { uint120 price; uint8 confidence; }`.
//! Prices are scaled by `10^18` and truncated before encoding.
//!
//! ```text
//! commitment = keccak256(abi.encode(reports, salt, sender))
//! ```

use std::marker::PhantomData;

use alloy_primitives::{address, aliases::U120, b256, keccak256, Address, B256, U256};
use alloy_sol_types::{sol, sol_data, SolType};
use bigdecimal::{BigDecimal, Signed, ToPrimitive};
use oracle_types::{Price, Report, MAX_CONFIDENCE, PRICE_PRECISION_DECIMALS};

use crate::{CommitmentError, Result};

sol! {
    /// Mirror of the oracle contract's `Report` struct.
    struct AbiReport {
        uint120 price;
        uint8 confidence;
    }
}

/// Argument schema of the commitment payload.
type CommitmentArgs = (
    sol_data::Array<AbiReport>,
    sol_data::Uint<256>,
    sol_data::Address,
);

/// Largest scaled price the contract accepts (exclusive).
const UINT120_LIMIT: u128 = 1 << 120;

/// Sender of the reference commitment used for the startup self-check.
const REFERENCE_SENDER: Address = address!("0x71562b71999873db5b286df957af199ec94617f7");

/// `keccak256(abi.encode([{price: 1, confidence: 1}], 1, REFERENCE_SENDER))`.
const REFERENCE_COMMITMENT: B256 =
    b256!("0x08968f6f64cc0f74029fcd9b21203ba53a59600456f4ccf58aee3476dddd39f1");

/// Computes vote commitments exactly as the oracle contract verifies them.
///
/// Stateless; construct once at startup with [`CommitmentHashComputer::new`],
/// which refuses to build if the schema does not reproduce the reference
/// commitment.
#[derive(Debug, Clone, Copy)]
pub struct CommitmentHashComputer {
    schema: PhantomData<fn() -> CommitmentArgs>,
}

impl CommitmentHashComputer {
    /// Build the computer and self-check the ABI schema.
    ///
    /// # Errors
    ///
    /// [`CommitmentError::Schema`] if the reference vector does not match.
    pub fn new() -> Result<Self> {
        let computer = Self {
            schema: PhantomData,
        };
        let reference = [Report {
            price: 1,
            confidence: 1,
        }];
        let actual = computer.commitment_hash(&reference, 1, REFERENCE_SENDER)?;
        if actual != REFERENCE_COMMITMENT {
            return Err(CommitmentError::Schema {
                expected: REFERENCE_COMMITMENT.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(computer)
    }

    /// ABI-encode the commitment payload.
    pub fn encode(&self, reports: &[Report], salt: u64, sender: Address) -> Result<Vec<u8>> {
        let abi_reports = reports
            .iter()
            .map(|r| {
                if r.confidence > MAX_CONFIDENCE {
                    return Err(CommitmentError::InvalidConfidence(r.confidence));
                }
                let price = U120::try_from(r.price).map_err(|_| CommitmentError::PriceOverflow {
                    symbol: String::new(),
                    value: r.price.to_string(),
                })?;
                Ok(AbiReport {
                    price,
                    confidence: r.confidence,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CommitmentArgs::abi_encode_params(&(
            abi_reports,
            U256::from(salt),
            sender,
        )))
    }

    /// `keccak256(abi.encode(reports, salt, sender))`.
    pub fn commitment_hash(&self, reports: &[Report], salt: u64, sender: Address) -> Result<B256> {
        let payload = self.encode(reports, salt, sender)?;
        Ok(keccak256(payload))
    }
}

/// Scale a price to its on-chain report: `value * 10^18` truncated toward
/// zero, paired with its confidence.
pub fn report_from_price(price: &Price) -> Result<Report> {
    if price.value.is_negative() {
        return Err(CommitmentError::NegativePrice {
            symbol: price.symbol.clone(),
            value: price.value.to_string(),
        });
    }
    if price.confidence > MAX_CONFIDENCE {
        return Err(CommitmentError::InvalidConfidence(price.confidence));
    }

    let scale = BigDecimal::from(10u64.pow(PRICE_PRECISION_DECIMALS));
    let (scaled, _) = (&price.value * scale)
        .with_scale(0)
        .into_bigint_and_exponent();

    let scaled = scaled
        .to_u128()
        .filter(|v| *v < UINT120_LIMIT)
        .ok_or_else(|| CommitmentError::PriceOverflow {
            symbol: price.symbol.clone(),
            value: price.value.to_string(),
        })?;

    Ok(Report {
        price: scaled,
        confidence: price.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::Zero;
    use hex_literal::hex;
    use std::str::FromStr;

    fn price(symbol: &str, value: &str, confidence: u8) -> Price {
        Price {
            symbol: symbol.to_string(),
            value: BigDecimal::from_str(value).expect("decimal"),
            timestamp: 0,
            confidence,
            volume: BigDecimal::zero(),
        }
    }

    #[test]
    fn test_schema_self_check() {
        CommitmentHashComputer::new().expect("schema self-check");
    }

    #[test]
    fn test_reference_vector() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: 1,
            confidence: 1,
        }];
        let hash = computer
            .commitment_hash(&reports, 1, REFERENCE_SENDER)
            .expect("hash");
        assert_eq!(
            hash.0,
            hex!("08968f6f64cc0f74029fcd9b21203ba53a59600456f4ccf58aee3476dddd39f1")
        );
        assert_eq!(hash, REFERENCE_COMMITMENT);

        // Same inputs, same hash.
        let again = computer
            .commitment_hash(&reports, 1, REFERENCE_SENDER)
            .expect("hash");
        assert_eq!(hash, again);
    }

    #[test]
    fn test_sender_is_bound() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: 1,
            confidence: 1,
        }];
        let other = address!("0x7156e0c4b4b6dcc24e7d6d3b3df9bd3d2d2b2f86");
        let hash = computer.commitment_hash(&reports, 1, other).expect("hash");
        assert_eq!(
            hash.0,
            hex!("9a2123cff842ea97847d9503d40af8d5c1b74d7c17f2985a2378579634203803")
        );
        assert_ne!(hash, REFERENCE_COMMITMENT);
    }

    #[test]
    fn test_zero_sender_vector() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: 1,
            confidence: 1,
        }];
        let hash = computer
            .commitment_hash(&reports, 1, Address::ZERO)
            .expect("hash");
        assert_eq!(
            hash.0,
            hex!("cc397ff0141793c97e671310b45b30ae38c7876d7ca1b947e5c9cbf04e6ddcf4")
        );
    }

    #[test]
    fn test_empty_reports_vector() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let hash = computer
            .commitment_hash(&[], 0, REFERENCE_SENDER)
            .expect("hash");
        assert_eq!(
            hash.0,
            hex!("62550cbeea9e99379d9067ed6262ae0247cde887f83d81a4258df6135b487a7a")
        );
    }

    #[test]
    fn test_multi_report_vector() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [
            Report {
                price: 1_500_000_000_000_000_000,
                confidence: 100,
            },
            Report {
                price: 2_000_000_000_000_000_000,
                confidence: 80,
            },
        ];
        let hash = computer
            .commitment_hash(&reports, 12345, REFERENCE_SENDER)
            .expect("hash");
        assert_eq!(
            hash.0,
            hex!("408a5f5ba7f3fac5e58dde6ad1704277a3aed1e5ed5efac4db5adf324f224626")
        );
    }

    #[test]
    fn test_payload_layout() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: 7,
            confidence: 9,
        }];
        let payload = computer
            .encode(&reports, 5, REFERENCE_SENDER)
            .expect("encode");
        // head: offset, salt, sender; tail: length, price, confidence
        assert_eq!(payload.len(), 6 * 32);
        assert_eq!(payload[31], 0x60);
        assert_eq!(payload[63], 5);
        assert_eq!(&payload[76..96], REFERENCE_SENDER.as_slice());
        assert_eq!(payload[127], 1);
        assert_eq!(payload[159], 7);
        assert_eq!(payload[191], 9);
    }

    #[test]
    fn test_salt_changes_hash() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: 1,
            confidence: 1,
        }];
        let a = computer
            .commitment_hash(&reports, 1, REFERENCE_SENDER)
            .expect("hash");
        let b = computer
            .commitment_hash(&reports, 2, REFERENCE_SENDER)
            .expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_rejects_wide_price() {
        let computer = CommitmentHashComputer::new().expect("computer");
        let reports = [Report {
            price: UINT120_LIMIT,
            confidence: 1,
        }];
        let err = computer
            .encode(&reports, 1, Address::ZERO)
            .expect_err("uint120 overflow");
        assert!(matches!(err, CommitmentError::PriceOverflow { .. }));
    }

    #[test]
    fn test_report_from_price_truncates() {
        let report = report_from_price(&price("EUR-USD", "1.0812345678901234567891", 90))
            .expect("report");
        assert_eq!(report.price, 1_081_234_567_890_123_456);
        assert_eq!(report.confidence, 90);
    }

    #[test]
    fn test_report_from_large_price() {
        // Beyond u64 once scaled.
        let report = report_from_price(&price("JPY-USD", "150000.5", 100)).expect("report");
        assert_eq!(report.price, 150_000_500_000_000_000_000_000);
    }

    #[test]
    fn test_report_from_price_rejects_negative() {
        let err = report_from_price(&price("EUR-USD", "-1", 100)).expect_err("negative");
        assert!(matches!(err, CommitmentError::NegativePrice { .. }));
    }

    #[test]
    fn test_report_from_price_rejects_overflow() {
        // 2^120 / 10^18 is roughly 1.33e18.
        let err = report_from_price(&price("ATN-USD", "2000000000000000000", 100))
            .expect_err("overflow");
        assert!(matches!(err, CommitmentError::PriceOverflow { .. }));
    }

    #[test]
    fn test_report_from_price_rejects_bad_confidence() {
        let err = report_from_price(&price("EUR-USD", "1", 101)).expect_err("confidence");
        assert!(matches!(err, CommitmentError::InvalidConfidence(101)));
    }
}
