/*
    Snapshot round-trip property

    For a log with concurrent writers (several heads), producing a snapshot
    and applying it on a fresh store yields the same entry set and the
    same heads, without any per-entry fetch.
*/

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use umbra_core::config::SnapshotConfig;
use umbra_core::core_log::{
    EntryHash, LogEntry, LogFactory, LogType, MemoryNetwork, MemoryPeer, ReplicatedLog,
};
use umbra_core::core_snapshot::{ApplyOutcome, SnapshotCoordinator};

const STORE: &str = "channels.prop";

fn config(producer: bool) -> SnapshotConfig {
    SnapshotConfig { create_snapshot: producer, ..SnapshotConfig::default() }
}

async fn open(peer: &MemoryPeer) -> Arc<dyn ReplicatedLog> {
    let log = peer.open(STORE, LogType::EventLog).await.unwrap();
    log.load().await.unwrap();
    log
}

type Observed = (BTreeSet<EntryHash>, Vec<EntryHash>, usize);

async fn roundtrip(a_writes: usize, c_writes: usize) -> (Observed, Observed) {
    let network = MemoryNetwork::new();
    let a = network.peer("a");
    let b = network.peer("b");
    let c = network.peer("c");

    let log_a = open(&a).await;
    let log_c = open(&c).await;
    c.set_online(false);
    for i in 0..a_writes {
        log_a.append(format!("a{}", i).into_bytes()).await.unwrap();
    }
    for i in 0..c_writes {
        log_c.append(format!("c{}", i).into_bytes()).await.unwrap();
    }
    c.set_online(true);
    log_a.load().await.unwrap();

    let producer = SnapshotCoordinator::open(&a, a.blobs(), log_a.clone(), "a", config(true))
        .await
        .unwrap();
    let pointer = producer.produce().await.unwrap().unwrap();

    // nobody left to fetch from: everything must come from the blob
    a.set_online(false);
    c.set_online(false);

    let target = b.open(STORE, LogType::EventLog).await.unwrap();
    let consumer = SnapshotCoordinator::open(&b, b.blobs(), target.clone(), "b", config(false))
        .await
        .unwrap();
    let outcome = consumer.apply(&pointer).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));

    let observe = |entries: Vec<LogEntry>, heads: Vec<EntryHash>, fetched: usize| {
        (entries.iter().map(|e| e.hash).collect::<BTreeSet<_>>(), heads, fetched)
    };
    let expected = observe(log_a.entries().await.unwrap(), log_a.heads().await.unwrap(), 0);
    let actual = observe(
        target.entries().await.unwrap(),
        target.heads().await.unwrap(),
        b.fetch_count(STORE),
    );
    (expected, actual)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_snapshot_roundtrip(a_writes in 1usize..30, c_writes in 0usize..30) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (expected, actual) = runtime.block_on(roundtrip(a_writes, c_writes));
        prop_assert_eq!(expected.0.len(), a_writes + c_writes);
        prop_assert_eq!(actual, expected);
    }
}
