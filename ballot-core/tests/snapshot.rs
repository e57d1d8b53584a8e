mod common;

use std::{sync::Arc, time::Duration};

use ballot_core::{
    commitment::CommitmentBackend,
    ledger::{Ledger, MemoryLedger, ProposalAccount},
    lifecycle::Phase,
    readiness::Readiness,
    secret::derive_secret,
    snapshot::{assemble, ProposalMetadata},
    source::{Holder, MemoryBalanceSource},
    tree::verify_inclusion,
    Collaborators, Error, Field, VotingCore,
};
use common::*;

#[test_log::test(tokio::test)]
async fn scenario_weights_padding_and_proofs() {
    let h = harness(scenario_holders());
    let snapshot = h.core.snapshots.initialize(request(1)).await.unwrap();

    let weights: Vec<_> = ["A", "B", "C", "D"]
        .iter()
        .map(|owner| snapshot.voter(owner).unwrap().weight)
        .collect();
    assert_eq!(weights, vec![10, 31, 8, 3]);

    let backend = CommitmentBackend::default();
    let leaves = snapshot.tree.leaves();
    assert_eq!(leaves.len(), 8);
    assert!(leaves[4..].iter().all(|leaf| *leaf == backend.padding_leaf()));
    assert_eq!(snapshot.levels().last().unwrap(), &vec![snapshot.root]);

    let proof = h.core.proofs.get_proof(1, "A").unwrap();
    assert_eq!(proof.index, 0);
    assert_eq!(proof.secret, derive_secret("A"));
    assert_eq!(proof.leaf, backend.commit(&proof.secret, &Field::from(10)));
    assert!(verify_inclusion(
        &backend,
        proof.leaf,
        proof.index,
        &proof.path,
        snapshot.root
    ));

    let err = h.core.proofs.get_proof(1, "Z").unwrap_err();
    assert!(matches!(err, Error::Ineligible { proposal_id: 1, .. }));

    assert_eq!(h.core.lifecycle.phase(1), Some(Phase::OpenForVoting));
    let published = h.ledger.merkle_root(h.core.address.proposal_key(1));
    assert_eq!(published, Some(snapshot.root));
}

#[test_log::test(tokio::test)]
async fn every_voter_proof_verifies_and_tampering_fails() {
    let h = harness(scenario_holders());
    let snapshot = h.core.snapshots.initialize(request(2)).await.unwrap();
    let backend = CommitmentBackend::default();

    for holder in scenario_holders() {
        let proof = h.core.proofs.get_proof(2, &holder.owner).unwrap();
        assert_eq!(proof.root, snapshot.root);
        assert!(verify_inclusion(&backend, proof.leaf, proof.index, &proof.path, proof.root));

        for round in 0..proof.path.len() {
            let mut tampered = proof.path.clone();
            tampered[round] = backend.commit(&tampered[round], &Field::from(1));
            assert!(!verify_inclusion(&backend, proof.leaf, proof.index, &tampered, proof.root));
        }
    }
}

#[test]
fn assembling_twice_is_deterministic() {
    let backend = CommitmentBackend::default();
    let first = assemble(&backend, 3, 1, MINT, scenario_holders()).unwrap();
    let second = assemble(&backend, 3, 1, MINT, scenario_holders()).unwrap();
    assert_eq!(first.root, second.root);
    assert_eq!(first.tree, second.tree);
    for (owner, record) in &first.voters {
        assert_eq!(second.voters[owner].leaf, record.leaf);
    }
}

#[test]
fn root_depends_on_voter_count() {
    let backend = CommitmentBackend::default();
    let holders = scenario_holders();
    let roots: Vec<Field> = (1..=holders.len())
        .map(|k| assemble(&backend, 3, 1, MINT, holders[..k].to_vec()).unwrap().root)
        .collect();
    for (i, a) in roots.iter().enumerate() {
        for b in &roots[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn capacity_truncates_in_supplied_order() {
    let backend = CommitmentBackend::default();
    let holders: Vec<_> = (1..=12).map(|i| Holder::new(format!("owner-{i}"), i * i)).collect();
    let snapshot = assemble(&backend, 3, 1, MINT, holders).unwrap();
    assert_eq!(snapshot.voter_count(), 8);
    assert_eq!(snapshot.voter("owner-8").unwrap().index, 7);
    assert!(snapshot.voter("owner-12").is_none());
    assert!(snapshot.tree.leaves().iter().all(|leaf| *leaf != backend.padding_leaf()));
}

#[test_log::test(tokio::test)]
async fn second_initialization_is_rejected() {
    let h = harness(scenario_holders());
    let first = h.core.snapshots.initialize(request(3)).await.unwrap();
    let err = h.core.snapshots.initialize(request(3)).await.unwrap_err();
    assert!(matches!(err, Error::SnapshotExists { proposal_id: 3 }));
    assert_eq!(h.core.store.get(3).unwrap().root, first.root);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_initializations_create_one_snapshot() {
    let h = harness(scenario_holders());
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let core = Arc::clone(&h.core);
            tokio::spawn(async move { core.snapshots.initialize(request(4)).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(Error::SnapshotExists { proposal_id: 4 }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
}

#[test_log::test(tokio::test)]
async fn empty_and_unknown_assets_fail() {
    let h = harness(vec![Holder::new("A", 0), Holder::new("B", 0)]);
    let err = h.core.snapshots.initialize(request(5)).await.unwrap_err();
    assert!(matches!(err, Error::EmptyVoterSet { .. }));
    assert!(h.core.store.get(5).is_none());

    let mut unknown = request(6);
    unknown.asset_id = "OtherMint".into();
    let err = h.core.snapshots.initialize(unknown).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unreachable_source_is_upstream_unavailable() {
    let h = harness_with(MemoryBalanceSource::offline(), config());
    let err = h.core.snapshots.initialize(request(7)).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));
    assert!(h.core.store.get(7).is_none());
    assert_eq!(h.core.lifecycle.phase(7), None);
}

#[test_log::test(tokio::test)]
async fn creator_is_placed_first_when_missing() {
    let source = MemoryBalanceSource::new()
        .with_asset(MINT, scenario_holders())
        .with_unlisted(MINT, "LATECOMER", 49);
    let h = harness_with(source, config());

    let mut with_creator = request(8);
    with_creator.creator = Some("B".into());
    let snapshot = h.core.snapshots.initialize(with_creator).await.unwrap();
    assert_eq!(snapshot.voter("B").unwrap().index, 1);

    let mut absent_creator = request(9);
    absent_creator.creator = Some("NEWCOMER".into());
    absent_creator.metadata = Some(ProposalMetadata {
        title: "Fund the grants round".into(),
        description: String::new(),
        duration_hours: 48,
    });
    let snapshot = h.core.snapshots.initialize(absent_creator).await.unwrap();
    assert!(snapshot.voter("NEWCOMER").is_none());
    assert_eq!(snapshot.voter("A").unwrap().index, 0);

    let summary = h.core.proposal(9).unwrap();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.metadata.unwrap().duration_hours, 48);

    let mut unlisted_creator = request(11);
    unlisted_creator.creator = Some("LATECOMER".into());
    let snapshot = h.core.snapshots.initialize(unlisted_creator).await.unwrap();
    let creator = snapshot.voter("LATECOMER").unwrap();
    assert_eq!((creator.index, creator.weight), (0, 7));
    assert_eq!(snapshot.voter("A").unwrap().index, 1);
}

#[test_log::test(tokio::test)]
async fn initialization_waits_for_backend_readiness() {
    let ledger = Arc::new(MemoryLedger::new());
    let backend = Arc::new(Readiness::<CommitmentBackend>::new("commitment"));
    let core = Arc::new(VotingCore::new(
        &config(),
        Arc::clone(&backend),
        Collaborators {
            source: Arc::new(MemoryBalanceSource::new().with_asset(MINT, scenario_holders())),
            ledger,
            prover: Arc::new(ThresholdProver),
        },
    ));

    assert!(backend.begin());
    let pending = {
        let core = Arc::clone(&core);
        tokio::spawn(async move { core.snapshots.initialize(request(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    backend.complete(CommitmentBackend::default());
    let snapshot = pending.await.unwrap().unwrap();
    assert_eq!(snapshot.voter_count(), 4);
}

#[test_log::test(tokio::test)]
async fn proposal_ids_advance_past_stored_snapshots() {
    let h = harness(scenario_holders());
    assert_eq!(h.core.next_proposal_id().await, 1);
    h.core.snapshots.initialize(request(41)).await.unwrap();
    assert_eq!(h.core.next_proposal_id().await, 42);
}

#[test_log::test(tokio::test)]
async fn proposal_ids_skip_records_already_on_the_ledger() {
    let h = harness(scenario_holders());
    h.core.snapshots.initialize(request(3)).await.unwrap();
    // Published by an earlier process; unknown to this store.
    h.ledger
        .publish_root(ProposalAccount {
            proposal_id: 90,
            proposal_key: h.core.address.proposal_key(90),
            merkle_root: Field::from(1),
            voter_count: 1,
        })
        .await
        .unwrap();
    assert_eq!(h.core.next_proposal_id().await, 91);

    h.ledger.set_offline(true);
    assert_eq!(h.core.next_proposal_id().await, 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unconfirmed_publication_is_resumed_on_retry() {
    let ledger = Arc::new(MemoryLedger::new());
    let core = core_over(
        MemoryBalanceSource::new().with_asset(MINT, scenario_holders()),
        Arc::new(UnconfirmedLedger {
            inner: Arc::clone(&ledger),
            delay: Duration::from_secs(30),
        }),
        config(),
    );

    let err = core.snapshots.initialize(request(1)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    let reserved = core.store.get(1).unwrap();
    assert_eq!(core.lifecycle.phase(1), Some(Phase::Created));
    assert_eq!(ledger.merkle_root(core.address.proposal_key(1)), Some(reserved.root));
    assert!(matches!(core.proofs.get_proof(1, "A"), Err(Error::NotFound(_))));
    assert!(matches!(
        core.relay.relay_vote(vote(1, 0x01)).await,
        Err(Error::InvalidState { phase: Phase::Created, .. })
    ));

    let snapshot = core.snapshots.initialize(request(1)).await.unwrap();
    assert_eq!(snapshot.root, reserved.root);
    assert_eq!(core.lifecycle.phase(1), Some(Phase::OpenForVoting));
    assert!(core.proofs.get_proof(1, "A").is_ok());
    core.relay.relay_vote(vote(1, 0x01)).await.unwrap();

    let err = core.snapshots.initialize(request(1)).await.unwrap_err();
    assert!(matches!(err, Error::SnapshotExists { proposal_id: 1 }));
}

#[test_log::test(tokio::test)]
async fn offline_ledger_keeps_the_reservation() {
    let h = harness(scenario_holders());
    h.ledger.set_offline(true);
    let err = h.core.snapshots.initialize(request(12)).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));
    assert_eq!(h.core.lifecycle.phase(12), Some(Phase::Created));

    h.ledger.set_offline(false);
    let snapshot = h.core.snapshots.initialize(request(12)).await.unwrap();
    assert_eq!(
        h.ledger.merkle_root(h.core.address.proposal_key(12)),
        Some(snapshot.root)
    );
    assert_eq!(h.core.lifecycle.phase(12), Some(Phase::OpenForVoting));
}

#[test_log::test(tokio::test)]
async fn foreign_ledger_record_is_not_adopted() {
    let h = harness(scenario_holders());
    h.ledger
        .publish_root(ProposalAccount {
            proposal_id: 13,
            proposal_key: h.core.address.proposal_key(13),
            merkle_root: Field::from(77),
            voter_count: 1,
        })
        .await
        .unwrap();

    let err = h.core.snapshots.initialize(request(13)).await.unwrap_err();
    assert!(matches!(err, Error::SnapshotExists { proposal_id: 13 }));
    assert_eq!(h.core.lifecycle.phase(13), Some(Phase::Created));
    assert!(matches!(h.core.proofs.get_proof(13, "A"), Err(Error::NotFound(_))));
    assert!(h.core.eligibility("A").is_empty());
}

#[test_log::test(tokio::test)]
async fn discovery_lists_newest_first_with_weights() {
    let source = MemoryBalanceSource::new()
        .with_asset(MINT, scenario_holders())
        .with_asset("OtherMint", vec![Holder::new("B", 16), Holder::new("E", 4)]);
    let h = harness_with(source, config());

    h.core.snapshots.initialize(request(1)).await.unwrap();
    let mut other = request(2);
    other.asset_id = "OtherMint".into();
    h.core.snapshots.initialize(other).await.unwrap();

    let ids: Vec<_> = h.core.proposals().iter().map(|p| p.proposal_id).collect();
    assert_eq!(ids, vec![2, 1]);

    let eligible = h.core.eligibility("B");
    let weights: Vec<_> = eligible.iter().map(|e| (e.proposal_id, e.weight, e.balance)).collect();
    assert_eq!(weights, vec![(2, 4, 16), (1, 31, 1000)]);
    assert_eq!(h.core.eligibility("E").len(), 1);
    assert!(h.core.eligibility("nobody").is_empty());
}
