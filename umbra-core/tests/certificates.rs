/*
    Certificate ledger through the node

    Tests covering:
    1. Accepting a chain-verified certificate and case-insensitive lookup
    2. Rejected certificates leave the ledger untouched
    3. Replication of the accepted list to a second peer
*/

use proptest::prelude::*;
use umbra_core::core_log::MemoryNetwork;
use umbra_core::test_utils::{user_cert, TestPeer};
use umbra_core::Notification;

#[tokio::test]
async fn test_accept_and_lookup() -> anyhow::Result<()> {
    let alice = TestPeer::new("alice").start().await;
    let node = &alice.node;

    assert!(node.save_certificate(&user_cert("alice", "root")).await);
    assert!(node.username_exists("Alice").await?);
    assert!(node.username_exists("ALICE").await?);
    assert!(!node.username_exists("bob").await?);

    let certificates = node.certificates().await?;
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].sequence, 1);
    Ok(())
}

#[tokio::test]
async fn test_rejections_do_not_append() -> anyhow::Result<()> {
    let alice = TestPeer::new("alice").start().await;
    let node = &alice.node;

    assert!(node.save_certificate(&user_cert("alice", "root")).await);
    assert!(!node.save_certificate(&user_cert("Alice", "root")).await);
    assert!(!node.save_certificate(&user_cert("mallory", "rogue-root")).await);
    assert!(!node.save_certificate("not a certificate").await);

    assert_eq!(alice.peer.entry_count("certificates"), 1);
    assert!(!node.username_exists("mallory").await?);
    Ok(())
}

#[tokio::test]
async fn test_certificates_replicate() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let alice = TestPeer::on(&network, "alice").start().await;
    let bob = TestPeer::on(&network, "bob").start().await;

    assert!(alice.node.save_certificate(&user_cert("alice", "root")).await);
    let pushed = bob
        .wait_for("certificateListUpdated", |n| {
            matches!(n, Notification::CertificateListUpdated { certificates } if certificates.len() == 1)
        })
        .await;
    assert!(pushed.is_some());
    assert!(bob.node.username_exists("alice").await?);

    // the name is now taken network-wide
    assert!(!bob.node.save_certificate(&user_cert("aLiCe", "root")).await);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_unverified_certificates_never_append(nick in "[a-z]{1,12}", issuer in "[a-z]{1,8}") {
        prop_assume!(issuer != "root");
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (saved, count) = runtime.block_on(async {
            let alice = TestPeer::new("alice").start().await;
            let saved = alice.node.save_certificate(&user_cert(&nick, &issuer)).await;
            (saved, alice.peer.entry_count("certificates"))
        });
        prop_assert!(!saved);
        prop_assert_eq!(count, 0);
    }
}
