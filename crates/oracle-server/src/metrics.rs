//! Vote and penalty counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Things the server counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    VotesSubmitted,
    SuccessfulVotes,
    InvalidVotes,
    NoRevealPenalties,
    OutlierPenalties,
    Rewards,
    /// Rounds skipped because a symbol could not be priced.
    MissedRounds,
    Resyncs,
}

/// Process-wide counters, cheap to bump from the event loop.
#[derive(Debug, Default)]
pub struct OracleMetrics {
    votes_submitted: AtomicU64,
    successful_votes: AtomicU64,
    invalid_votes: AtomicU64,
    no_reveal_penalties: AtomicU64,
    outlier_penalties: AtomicU64,
    rewards: AtomicU64,
    missed_rounds: AtomicU64,
    resyncs: AtomicU64,
}

/// Point-in-time copy of [`OracleMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub votes_submitted: u64,
    pub successful_votes: u64,
    pub invalid_votes: u64,
    pub no_reveal_penalties: u64,
    pub outlier_penalties: u64,
    pub rewards: u64,
    pub missed_rounds: u64,
    pub resyncs: u64,
}

impl OracleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `counter` by one.
    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            votes_submitted: self.get(Counter::VotesSubmitted),
            successful_votes: self.get(Counter::SuccessfulVotes),
            invalid_votes: self.get(Counter::InvalidVotes),
            no_reveal_penalties: self.get(Counter::NoRevealPenalties),
            outlier_penalties: self.get(Counter::OutlierPenalties),
            rewards: self.get(Counter::Rewards),
            missed_rounds: self.get(Counter::MissedRounds),
            resyncs: self.get(Counter::Resyncs),
        }
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::VotesSubmitted => &self.votes_submitted,
            Counter::SuccessfulVotes => &self.successful_votes,
            Counter::InvalidVotes => &self.invalid_votes,
            Counter::NoRevealPenalties => &self.no_reveal_penalties,
            Counter::OutlierPenalties => &self.outlier_penalties,
            Counter::Rewards => &self.rewards,
            Counter::MissedRounds => &self.missed_rounds,
            Counter::Resyncs => &self.resyncs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = OracleMetrics::new();
        metrics.incr(Counter::VotesSubmitted);
        metrics.incr(Counter::VotesSubmitted);
        metrics.incr(Counter::Resyncs);

        let snap = metrics.snapshot();
        assert_eq!(snap.votes_submitted, 2);
        assert_eq!(snap.resyncs, 1);
        assert_eq!(snap.invalid_votes, 0);
        assert_eq!(metrics.get(Counter::VotesSubmitted), 2);
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = OracleMetrics::new();
        metrics.incr(Counter::OutlierPenalties);
        let json = serde_json::to_value(metrics.snapshot()).expect("serialize");
        assert_eq!(json["outlier_penalties"], 1);
    }
}
