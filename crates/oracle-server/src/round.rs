//! Round boundary tracking.
//!
//! A round lasts `vote_period` blocks starting at `height`. Sampling for
//! the next round starts `pre_sampling_range` blocks before it begins.

use oracle_types::symbols::with_bridging_symbols;

/// Where the coordinator is in the round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial contract read not done yet.
    Syncing,
    /// Synced, waiting for the pre-sampling window.
    Synced,
    /// Collecting samples for the upcoming round.
    PreSampling,
    /// Building and submitting the vote.
    Voting,
    /// Commitment submitted, reveal due next round.
    WaitingReveal,
}

/// Round data read from the contract or taken from a `NewRound` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    pub round: u64,
    /// Block the round started at.
    pub height: u64,
    /// Block timestamp of the round start.
    pub timestamp: u64,
    pub vote_period: u64,
    /// Protocol symbols, authoritative from the contract.
    pub symbols: Vec<String>,
    /// Symbols sampled from plugins: protocol symbols, announced symbols
    /// and their bridging pairs.
    pub sampling_symbols: Vec<String>,
}

impl RoundState {
    /// Replace the protocol symbols and reset sampling to match them.
    pub fn set_protocol_symbols(&mut self, symbols: Vec<String>) {
        self.sampling_symbols = with_bridging_symbols(&symbols);
        self.symbols = symbols;
    }

    /// Start sampling `symbols` ahead of them becoming mandatory.
    pub fn add_sampling_symbols(&mut self, symbols: &[String]) {
        let mut merged = self.sampling_symbols.clone();
        merged.extend(symbols.iter().cloned());
        self.sampling_symbols = with_bridging_symbols(&merged);
    }

    /// Block height the next round starts at.
    ///
    /// Before the first round has a height the first boundary is
    /// `vote_period` itself.
    pub fn next_round_height(&self) -> u64 {
        if self.round <= 1 && self.height == 0 {
            self.vote_period
        } else {
            self.height.saturating_add(self.vote_period)
        }
    }

    /// Whether `block` is within `range` blocks of the next round.
    pub fn in_pre_sampling_window(&self, block: u64, range: u64) -> bool {
        self.next_round_height().saturating_sub(block) <= range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(round: u64, height: u64, vote_period: u64) -> RoundState {
        RoundState {
            round,
            height,
            vote_period,
            ..RoundState::default()
        }
    }

    #[test]
    fn test_next_round_height() {
        assert_eq!(state(1, 0, 30).next_round_height(), 30);
        assert_eq!(state(0, 0, 30).next_round_height(), 30);
        assert_eq!(state(5, 120, 30).next_round_height(), 150);
    }

    #[test]
    fn test_pre_sampling_window() {
        let s = state(5, 120, 30);
        assert!(!s.in_pre_sampling_window(120, 15));
        assert!(!s.in_pre_sampling_window(134, 15));
        assert!(s.in_pre_sampling_window(135, 15));
        assert!(s.in_pre_sampling_window(149, 15));
        // Late blocks keep sampling until the new round arrives.
        assert!(s.in_pre_sampling_window(151, 15));
    }

    #[test]
    fn test_first_round_window() {
        let s = state(1, 0, 30);
        assert!(!s.in_pre_sampling_window(10, 15));
        assert!(s.in_pre_sampling_window(15, 15));
    }

    #[test]
    fn test_symbol_sets() {
        let mut s = RoundState::default();
        s.set_protocol_symbols(vec!["EUR-USD".to_string(), "ATN-USD".to_string()]);
        assert_eq!(s.symbols.len(), 2);
        assert_eq!(
            s.sampling_symbols,
            vec!["EUR-USD", "ATN-USD", "ATN-USDC", "USDC-USD"]
        );

        s.add_sampling_symbols(&["JPY-USD".to_string()]);
        assert_eq!(s.symbols.len(), 2);
        assert!(s.sampling_symbols.contains(&"JPY-USD".to_string()));

        s.set_protocol_symbols(vec!["EUR-USD".to_string()]);
        assert_eq!(s.sampling_symbols, vec!["EUR-USD"]);
    }
}
