//! Combining prices from several sources.
//!
//! ```text
//! median = middle of the sorted prices (mean of the two middles if even)
//! VWAP   = sum(price_i * volume_i) / sum(volume_i)
//! ```

use bigdecimal::{BigDecimal, Zero};

use crate::{AggregatorError, Result};

/// Median of `prices`.
///
/// # Errors
///
/// [`AggregatorError::EmptyInput`] if `prices` is empty.
pub fn median(prices: &[BigDecimal]) -> Result<BigDecimal> {
    if prices.is_empty() {
        return Err(AggregatorError::EmptyInput);
    }
    let mut sorted = prices.to_vec();
    sorted.sort();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid].clone())
    } else {
        Ok((&sorted[mid - 1] + &sorted[mid]) / BigDecimal::from(2))
    }
}

/// Volume-weighted average price.
///
/// # Errors
///
/// - [`AggregatorError::LengthMismatch`] if the slices differ in length
/// - [`AggregatorError::EmptyInput`] if there are no prices
/// - [`AggregatorError::ZeroVolume`] if all volumes sum to zero
pub fn vwap(prices: &[BigDecimal], volumes: &[BigDecimal]) -> Result<BigDecimal> {
    if prices.len() != volumes.len() {
        return Err(AggregatorError::LengthMismatch {
            prices: prices.len(),
            volumes: volumes.len(),
        });
    }
    if prices.is_empty() {
        return Err(AggregatorError::EmptyInput);
    }

    let mut weighted = BigDecimal::zero();
    let mut total = BigDecimal::zero();
    for (price, volume) in prices.iter().zip(volumes) {
        weighted += price * volume;
        total += volume;
    }

    if total.is_zero() {
        return Err(AggregatorError::ZeroVolume);
    }
    Ok(weighted / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("decimal")
    }

    fn decs(values: &[&str]) -> Vec<BigDecimal> {
        values.iter().map(|v| dec(v)).collect()
    }

    #[test]
    fn test_median_odd() {
        let m = median(&decs(&["1.3", "1.1", "1.2"])).expect("median");
        assert_eq!(m, dec("1.2"));
    }

    #[test]
    fn test_median_even() {
        let m = median(&decs(&["1.0", "4.0", "2.0", "3.0"])).expect("median");
        assert_eq!(m, dec("2.5"));
    }

    #[test]
    fn test_median_single() {
        assert_eq!(median(&decs(&["0.65"])).expect("median"), dec("0.65"));
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&[]), Err(AggregatorError::EmptyInput));
    }

    #[test]
    fn test_vwap_weighted() {
        // (1*100 + 2*300) / 400 = 1.75
        let v = vwap(&decs(&["1", "2"]), &decs(&["100", "300"])).expect("vwap");
        assert_eq!(v, dec("1.75"));
    }

    #[test]
    fn test_vwap_equal_volumes_is_mean() {
        let v = vwap(&decs(&["1", "2", "3"]), &decs(&["5", "5", "5"])).expect("vwap");
        assert_eq!(v, dec("2"));
    }

    #[test]
    fn test_vwap_zero_volume() {
        let err = vwap(&decs(&["1", "2"]), &decs(&["0", "0"])).expect_err("zero volume");
        assert_eq!(err, AggregatorError::ZeroVolume);
    }

    #[test]
    fn test_vwap_length_mismatch() {
        let err = vwap(&decs(&["1", "2"]), &decs(&["1"])).expect_err("mismatch");
        assert_eq!(
            err,
            AggregatorError::LengthMismatch {
                prices: 2,
                volumes: 1
            }
        );
    }
}
