mod common;

use common::{config, session, Network};

use endorse_client::{
    CommitStatus, ConsistencyError, Stage, TransactionError, TransactionProposal, TransportError,
};
use endorse_common::{BroadcastAck, CommitEvent, TxValidation};

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const DONE: &[u8] = br#"{"value":"done!"}"#;

fn put_k1() -> endorse_client::ProposalBuilder {
    TransactionProposal::builder("demo", "put").arg("k1")
}

#[tokio::test]
async fn agreeing_endorsers_commit_in_the_announced_block() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 0, DONE)
            .peer("peer1", 0, DONE)
            .peer("peer2", 0, DONE)
            .orderer("orderer0", Ok(BroadcastAck::Accepted))
            .orderer("orderer1", Err(TransportError::Timeout))
            .commits_in(42),
    );
    let config = config(&["peer0", "peer1", "peer2"], &["orderer0", "orderer1"]);
    let session = session(&network, &config);

    let committed = session.submit_and_wait(put_k1()).await.unwrap();
    assert_eq!(committed.block_number, 42);
    assert_eq!(committed.payload, DONE.to_vec());

    let broadcasts = network.broadcasts.lock().unwrap();
    assert_eq!(broadcasts.len(), 2);
    let envelope = &broadcasts[0].1;
    assert_eq!(envelope.body.endorsements.len(), 3);
    assert_eq!(envelope.body.header().unwrap().tx_id, committed.tx_id);
    assert_eq!(session.pending_watches(), 0);
}

#[tokio::test]
async fn diverging_endorsers_never_reach_the_orderer() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 0, b"A")
            .peer("peer1", 0, b"A")
            .peer("peer2", 0, b"B")
            .orderer("orderer0", Ok(BroadcastAck::Accepted))
            .commits_in(1),
    );
    let session = session(&network, &config(&["peer0", "peer1", "peer2"], &["orderer0"]));

    let err = session.submit(put_k1()).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Consistency);
    assert!(!err.is_retryable());
    let sets = match err {
        TransactionError::Consistency(ConsistencyError::EndorsementMismatch { sets }) => sets,
        other => panic!("expected an endorsement mismatch, got {other:?}"),
    };
    let shape: Vec<_> = sets
        .iter()
        .map(|set| (set.payload().to_vec(), set.len()))
        .collect();
    assert_eq!(shape, vec![(b"A".to_vec(), 2), (b"B".to_vec(), 1)]);

    assert_eq!(network.broadcast_count(), 0);
    assert_eq!(session.pending_watches(), 0);
}

#[tokio::test]
async fn query_returns_first_success_without_ordering() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 0, br#"{"value":"x"}"#)
            .peer("peer1", 0, br#"{"value":"y"}"#)
            .orderer("orderer0", Ok(BroadcastAck::Accepted)),
    );
    let session = session(&network, &config(&["peer0", "peer1"], &["orderer0"]));

    let result = session
        .evaluate(TransactionProposal::builder("demo", "get").arg("k1"))
        .await
        .unwrap();
    assert_eq!(result.payload, br#"{"value":"x"}"#.to_vec());
    assert_eq!(network.broadcast_count(), 0);
    assert_eq!(network.endorse_calls.load(Ordering::SeqCst), 0);
    assert_eq!(network.query_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_peers_do_not_reorder_the_endorsement_set() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 80, DONE)
            .peer("peer1", 40, DONE)
            .peer("peer2", 0, DONE)
            .orderer("orderer0", Ok(BroadcastAck::Accepted))
            .commits_in(7),
    );
    let session = session(&network, &config(&["peer0", "peer1", "peer2"], &["orderer0"]));
    session.submit_and_wait(put_k1()).await.unwrap();

    let broadcasts = network.broadcasts.lock().unwrap();
    let endorsers: Vec<_> = broadcasts[0]
        .1
        .body
        .endorsements
        .iter()
        .map(|e| e.endorser.clone())
        .collect();
    let in_peer_order: Vec<_> = ["peer0", "peer1", "peer2"]
        .iter()
        .map(|peer| network.certificate(peer))
        .collect();
    assert_eq!(endorsers, in_peer_order);
}

#[tokio::test]
async fn ordering_failure_releases_the_watch() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 0, DONE)
            .orderer("orderer0", Ok(BroadcastAck::Rejected("busy".into())))
            .orderer("orderer1", Err(TransportError::Closed)),
    );
    let session = session(&network, &config(&["peer0"], &["orderer0", "orderer1"]));

    let err = session.submit(put_k1()).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Ordering);
    assert!(err.is_retryable());
    assert_eq!(session.pending_watches(), 0);
}

#[tokio::test]
async fn unrelated_commits_leave_a_submitted_transaction_pending() {
    let network = Arc::new(
        Network::new()
            .peer("peer0", 0, DONE)
            .orderer("orderer0", Ok(BroadcastAck::Accepted)),
    );
    let mut config = config(&["peer0"], &["orderer0"]);
    config.commit_timeout = Duration::from_millis(200);
    let session = session(&network, &config);

    let mut submitted = session.submit(put_k1()).await.unwrap();
    for n in 0..5 {
        network.publish(CommitEvent {
            tx_id: format!("someone-else-{n}").into(),
            block_number: n,
            validation: TxValidation::Valid,
        });
    }
    assert_eq!(submitted.commit.wait().await, CommitStatus::TimedOut);
    assert_eq!(session.pending_watches(), 0);
}

#[tokio::test]
async fn reserved_transient_keys_fail_before_any_network_call() {
    let network = Arc::new(Network::new().peer("peer0", 0, DONE));
    let session = session(&network, &config(&["peer0"], &["orderer0"]));

    let err = session
        .submit(put_k1().transient("__creator", b"me".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Proposal);
    assert_eq!(network.endorse_calls.load(Ordering::SeqCst), 0);
}
