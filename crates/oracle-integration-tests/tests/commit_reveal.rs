//! Integration test: the commit-reveal vote across rounds.
//!
//! A voter commits to its reports in round N and reveals them together
//! with its round N+1 commitment. The revealed reports and salt must
//! reproduce the earlier commitment.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use oracle_crypto::CommitmentHashComputer;
use oracle_integration_tests::{sample_and_start_round, Harness, VOTER};
use oracle_server::chain::PenaltyLog;
use oracle_server::{Counter, Phase, ServerEvent};
use oracle_types::{ChainEvent, B256, U256};

const T0: u64 = 1_700_000_000;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).expect("decimal")
}

fn forex_harness() -> Harness {
    let harness = Harness::new(&["EUR-USD", "JPY-USD"]).expect("harness");
    harness.install_plugin("forex").expect("install plugin");
    harness.launcher.quote("forex", "EUR-USD", dec("1.08"), dec("1"));
    harness.launcher.quote("forex", "JPY-USD", dec("0.0067"), dec("1"));
    harness
}

#[tokio::test]
async fn test_commit_then_reveal() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");
    assert_eq!(server.phase(), Phase::Synced);
    assert_eq!(h.launcher.launches("forex"), 1);

    let stored = sample_and_start_round(&mut server, &h.contract, T0).await;
    assert_eq!(stored, 2);
    assert_eq!(server.phase(), Phase::WaitingReveal);

    let votes = h.contract.votes();
    assert_eq!(votes.len(), 1);
    let commit = votes[0].clone();
    assert!(commit.reports.is_empty(), "nothing to reveal in the first round");
    assert_eq!(commit.salt, 0);
    assert_eq!(commit.version, 1);
    assert_eq!(commit.fees.gas_tip_cap, U256::from(2u64));
    assert_eq!(commit.fees.max_fee_per_gas, U256::from(202u64));

    let record = server.vote_records().get(&2).expect("round 2 record").clone();
    assert_eq!(record.commitment_hash, commit.commitment);
    assert_eq!(record.symbols, vec!["EUR-USD", "JPY-USD"]);
    assert_eq!(record.reports[0].price, 1_080_000_000_000_000_000);
    assert_eq!(record.reports[1].price, 6_700_000_000_000_000);
    assert_eq!(record.tx_hash, Some(h.contract.receipts()[0].tx_hash));
    assert!(!record.mined);

    sample_and_start_round(&mut server, &h.contract, T0 + 30).await;
    let votes = h.contract.votes();
    assert_eq!(votes.len(), 2);
    let reveal = &votes[1];
    assert_eq!(reveal.reports, record.reports);
    assert_eq!(reveal.salt, record.salt);
    assert_ne!(reveal.commitment, B256::ZERO);

    let computer = CommitmentHashComputer::new().expect("schema");
    let recomputed = computer
        .commitment_hash(&reveal.reports, reveal.salt, VOTER)
        .expect("hash");
    assert_eq!(recomputed, commit.commitment);
    assert_eq!(server.metrics().get(Counter::VotesSubmitted), 2);
}

#[tokio::test]
async fn test_removed_voter_still_reveals() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");

    sample_and_start_round(&mut server, &h.contract, T0).await;
    let record = server.vote_records().get(&2).expect("round 2 record").clone();

    h.contract.update(|s| s.voters.clear());
    sample_and_start_round(&mut server, &h.contract, T0 + 30).await;
    let votes = h.contract.votes();
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[1].commitment, B256::ZERO);
    assert_eq!(votes[1].reports, record.reports);
    assert!(!server.vote_records().contains_key(&3));

    // Nothing left to reveal and no longer a voter.
    sample_and_start_round(&mut server, &h.contract, T0 + 60).await;
    assert_eq!(h.contract.votes().len(), 2);
}

#[tokio::test]
async fn test_incomplete_data_skips_the_round() {
    let h = Harness::new(&["EUR-USD", "JPY-USD"]).expect("harness");
    h.install_plugin("forex").expect("install plugin");
    h.launcher.quote("forex", "EUR-USD", dec("1.08"), dec("1"));

    let mut server = h.server().expect("server");
    server.start().await.expect("start");
    sample_and_start_round(&mut server, &h.contract, T0).await;

    assert!(h.contract.votes().is_empty());
    assert!(server.vote_records().is_empty());
    assert_eq!(server.phase(), Phase::Synced);
    assert_eq!(server.metrics().get(Counter::MissedRounds), 1);
}

#[tokio::test]
async fn test_syncing_or_unfunded_node_does_not_vote() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");

    h.contract.update(|s| s.syncing = true);
    sample_and_start_round(&mut server, &h.contract, T0).await;
    assert!(h.contract.votes().is_empty());

    h.contract.update(|s| {
        s.syncing = false;
        s.balance = U256::ZERO;
    });
    sample_and_start_round(&mut server, &h.contract, T0 + 30).await;
    assert!(h.contract.votes().is_empty());
    assert_eq!(server.metrics().get(Counter::MissedRounds), 1);

    h.contract.update(|s| s.balance = U256::from(1u64));
    sample_and_start_round(&mut server, &h.contract, T0 + 60).await;
    assert_eq!(h.contract.votes().len(), 1);
}

#[tokio::test]
async fn test_penalty_in_round_block_skips_vote() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");

    h.contract.update(|s| {
        s.penalties.push(PenaltyLog {
            participant: VOTER,
            symbol: "EUR-USD".to_string(),
            median: U256::from(100u64),
            reported: U256::from(150u64),
            slashing_amount: U256::from(5u64),
            block: 30,
        })
    });
    sample_and_start_round(&mut server, &h.contract, T0).await;

    assert!(h.contract.votes().is_empty());
    let outlier = server.outlier().expect("outlier recorded");
    assert_eq!(outlier.last_penalized_at_block, 30);
    assert_eq!(outlier.symbol, "EUR-USD");
}

#[tokio::test]
async fn test_outlier_cool_down_reveals_only() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");

    sample_and_start_round(&mut server, &h.contract, T0).await;
    let record = server.vote_records().get(&2).expect("round 2 record").clone();

    server
        .handle(ServerEvent::Chain(ChainEvent::Penalized {
            participant: VOTER,
            slashing_amount: U256::from(5u64),
            symbol: "JPY-USD".to_string(),
            median: U256::from(100u64),
            reported: U256::from(180u64),
            block: 45,
        }))
        .await;
    assert_eq!(server.metrics().get(Counter::OutlierPenalties), 1);
    assert!(server.vote_records()[&2].mined);

    // Round 3 at height 60: inside the cool-down, reveal round 2 only.
    sample_and_start_round(&mut server, &h.contract, T0 + 30).await;
    let votes = h.contract.votes();
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[1].commitment, B256::ZERO);
    assert_eq!(votes[1].salt, record.salt);

    // Rounds 4 and 5: nothing to reveal.
    sample_and_start_round(&mut server, &h.contract, T0 + 60).await;
    sample_and_start_round(&mut server, &h.contract, T0 + 90).await;
    assert_eq!(h.contract.votes().len(), 2);

    // Round 6 at height 150: cool-down over.
    sample_and_start_round(&mut server, &h.contract, T0 + 120).await;
    let votes = h.contract.votes();
    assert_eq!(votes.len(), 3);
    assert_ne!(votes[2].commitment, B256::ZERO);
    assert!(votes[2].reports.is_empty());
}

#[tokio::test]
async fn test_events_for_other_reporters_are_ignored() {
    let h = forex_harness();
    let mut server = h.server().expect("server");
    server.start().await.expect("start");
    sample_and_start_round(&mut server, &h.contract, T0).await;

    server
        .handle(ServerEvent::Chain(ChainEvent::SuccessfulVote {
            reporter: oracle_types::Address::repeat_byte(0x22),
        }))
        .await;
    assert!(!server.vote_records()[&2].mined);

    server
        .handle(ServerEvent::Chain(ChainEvent::InvalidVote {
            cause: "commitment mismatch".to_string(),
            reporter: VOTER,
            exp_value: U256::from(1u64),
            actual_value: U256::from(2u64),
        }))
        .await;
    let record = &server.vote_records()[&2];
    assert!(record.mined);
    assert_eq!(record.error.as_deref(), Some("commitment mismatch"));
    assert_eq!(server.metrics().get(Counter::InvalidVotes), 1);
}

#[tokio::test]
async fn test_history_fallback_reaches_older_records() {
    let h = Harness::new(&["EUR-USD", "JPY-USD"]).expect("harness");
    h.install_plugin("forex").expect("install forex");
    h.install_plugin("yen").expect("install yen");
    h.launcher.quote("forex", "EUR-USD", dec("1.08"), dec("1"));
    h.launcher.quote("yen", "JPY-USD", dec("0.0067"), dec("1"));

    let mut server = h.server().expect("server");
    server.start().await.expect("start");
    sample_and_start_round(&mut server, &h.contract, T0).await;
    assert!(server.vote_records()[&2].prices.contains_key("JPY-USD"));

    // Round 3 only requires EUR-USD, so its record carries no JPY price.
    h.contract.update(|s| s.symbols = vec!["EUR-USD".to_string()]);
    sample_and_start_round(&mut server, &h.contract, T0 + 30).await;
    assert!(!server.vote_records()[&3].prices.contains_key("JPY-USD"));

    // The only JPY source goes away before JPY-USD is required again.
    std::fs::remove_file(h.plugin_dir.path().join("yen")).expect("remove yen");
    server.handle(ServerEvent::RegularTick).await;
    assert!(h.launcher.instance("yen").expect("instance").is_closed());

    h.contract
        .update(|s| s.symbols = vec!["EUR-USD".to_string(), "JPY-USD".to_string()]);
    sample_and_start_round(&mut server, &h.contract, T0 + 60).await;

    let record = server.vote_records().get(&4).expect("round 4 record");
    let jpy = &record.prices["JPY-USD"];
    assert_eq!(jpy.value, dec("0.0067"));
    // A minute old: confidence halved.
    assert_eq!(jpy.confidence, 50);
    assert_eq!(record.reports[1].price, 6_700_000_000_000_000);
}
