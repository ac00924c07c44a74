//! Protocol symbol tables.
//!
//! Forex symbols come from FX data providers and are combined with a median.
//! Crypto symbols come from exchanges and are combined with VWAP. `ATN-USD`
//! and `NTN-USD` have no direct market; they are bridged through `USDC`.

pub const USDC_USD: &str = "USDC-USD";
pub const ATN_USD: &str = "ATN-USD";
pub const NTN_USD: &str = "NTN-USD";
pub const NTN_ATN: &str = "NTN-ATN";
pub const ATN_USDC: &str = "ATN-USDC";
pub const NTN_USDC: &str = "NTN-USDC";

/// Forex pairs quoted by the protocol.
pub const FOREX_SYMBOLS: &[&str] = &[
    "AUD-USD", "CAD-USD", "EUR-USD", "GBP-USD", "JPY-USD", "SEK-USD",
];

/// Crypto pairs, including the bridging pairs.
pub const CRYPTO_SYMBOLS: &[&str] = &[ATN_USD, NTN_USD, NTN_ATN, ATN_USDC, NTN_USDC, USDC_USD];

/// Whether `symbol` is a forex pair.
pub fn is_forex(symbol: &str) -> bool {
    FOREX_SYMBOLS.contains(&symbol)
}

/// For a bridged symbol, the crypto pair it is derived from.
///
/// `ATN-USD = ATN-USDC * USDC-USD`, `NTN-USD = NTN-USDC * USDC-USD`.
pub fn bridge_source(symbol: &str) -> Option<&'static str> {
    match symbol {
        ATN_USD => Some(ATN_USDC),
        NTN_USD => Some(NTN_USDC),
        _ => None,
    }
}

/// Extra symbols that must be sampled to be able to price `symbol`.
fn bridging_symbols(symbol: &str) -> &'static [&'static str] {
    match symbol {
        ATN_USD => &[ATN_USDC, USDC_USD],
        NTN_USD => &[NTN_USDC, USDC_USD],
        NTN_ATN => &[NTN_USDC, ATN_USDC, USDC_USD],
        _ => &[],
    }
}

/// Protocol symbols plus every bridging symbol they depend on, without
/// duplicates and in first-seen order.
pub fn with_bridging_symbols(protocol: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(protocol.len() + 3);
    for symbol in protocol {
        if !out.contains(symbol) {
            out.push(symbol.clone());
        }
        for extra in bridging_symbols(symbol) {
            if !out.iter().any(|s| s == extra) {
                out.push((*extra).to_string());
            }
        }
    }
    out
}
