/*
    certificates.rs - Chain-verified certificate ledger

    An append-only `certificates` log of PEM strings. Appends are gated on:
    - the chain verifying against the configured root certificates
    - an embedded nickname being present
    - no accepted certificate already holding that nickname, compared
      case-insensitively

    Replicas can still merge entries that were never checked locally, so
    every read goes through the accepted view: entries that verify, first
    occurrence per case-folded nickname wins.
*/

use super::errors::{StoreError, StoreResult};
use super::model::CertificateEntry;
use super::names::CERTIFICATES;
use super::wiring::{Attachment, StoreListener};
use crate::core_log::{LogEntry, LogFactory, LogType, ReplicatedLog};
use crate::notify::{Notification, NotificationSink};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Certificate operations the ledger needs; only pass/fail matters here
pub trait CertificateVerifier: Send + Sync {
    /// Whether `pem` chains to one of `root_pems`
    fn verify_chain(&self, pem: &str, root_pems: &[String]) -> bool;

    /// Nickname embedded in the certificate subject
    fn nickname(&self, pem: &str) -> Option<String>;
}

struct LedgerView {
    log: Arc<dyn ReplicatedLog>,
    verifier: Arc<dyn CertificateVerifier>,
    roots: Vec<String>,
    sink: Arc<dyn NotificationSink>,
}

impl LedgerView {
    async fn accepted(&self) -> StoreResult<Vec<CertificateEntry>> {
        let entries = self.log.entries().await.map_err(StoreError::log(CERTIFICATES))?;
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let pem = match std::str::from_utf8(&entry.payload) {
                Ok(pem) => pem,
                Err(_) => {
                    debug!(hash = %entry.hash, "Skipping non-utf8 certificate entry");
                    continue;
                }
            };
            if !self.verifier.verify_chain(pem, &self.roots) {
                continue;
            }
            let Some(name) = self.verifier.nickname(pem) else {
                continue;
            };
            if seen.insert(name.to_lowercase()) {
                accepted.push(CertificateEntry {
                    pem: pem.to_string(),
                    sequence: index as u64 + 1,
                });
            }
        }
        Ok(accepted)
    }

    async fn push(&self) {
        match self.accepted().await {
            Ok(accepted) => self.sink.emit(Notification::CertificateListUpdated {
                certificates: accepted.into_iter().map(|c| c.pem).collect(),
            }),
            Err(e) => warn!(store = CERTIFICATES, "Failed to read certificates: {}", e),
        }
    }
}

#[async_trait]
impl StoreListener for LedgerView {
    fn store(&self) -> &str {
        CERTIFICATES
    }

    async fn on_write(&self, _entry: LogEntry) {
        self.push().await;
    }

    async fn on_replicated(&self) {
        self.push().await;
    }
}

/// Append-only ledger of accepted certificates
pub struct CertificateLedger {
    view: Arc<LedgerView>,
    write_lock: Mutex<()>,
    attachment: Attachment,
}

impl CertificateLedger {
    /// Open, wire and load the `certificates` log
    pub async fn open(
        logs: &dyn LogFactory,
        verifier: Arc<dyn CertificateVerifier>,
        roots: Vec<String>,
        sink: Arc<dyn NotificationSink>,
    ) -> StoreResult<Self> {
        let log = logs
            .open(CERTIFICATES, LogType::EventLog)
            .await
            .map_err(StoreError::log(CERTIFICATES))?;
        let ledger = Self {
            view: Arc::new(LedgerView { log: log.clone(), verifier, roots, sink }),
            write_lock: Mutex::new(()),
            attachment: Attachment::new(),
        };
        ledger.attachment.attach(ledger.view.clone(), log.subscribe());
        log.load().await.map_err(StoreError::log(CERTIFICATES))?;
        info!(store = CERTIFICATES, roots = ledger.view.roots.len(), "Certificate ledger loaded");
        Ok(ledger)
    }

    /// Root certificates every accepted chain ends in. Saving and the
    /// accepted view check against this same set.
    pub fn roots(&self) -> &[String] {
        &self.view.roots
    }

    /// Verify against the ledger's roots and append. Nothing is written
    /// on error.
    pub async fn try_save(&self, pem: &str) -> StoreResult<CertificateEntry> {
        let _guard = self.write_lock.lock().await;
        let verifier = &self.view.verifier;
        if !verifier.verify_chain(pem, &self.view.roots) {
            return Err(StoreError::Verification("chain does not verify".to_string()));
        }
        let name = verifier
            .nickname(pem)
            .ok_or_else(|| StoreError::Verification("certificate has no nickname".to_string()))?;
        if self.username_exists(&name).await? {
            return Err(StoreError::Verification(format!("username {} is taken", name)));
        }

        let entry = self
            .view
            .log
            .append(pem.as_bytes().to_vec())
            .await
            .map_err(StoreError::log(CERTIFICATES))?;
        ::metrics::counter!(crate::metrics::ENTRIES_APPENDED).increment(1);
        let entries = self.view.log.entries().await.map_err(StoreError::log(CERTIFICATES))?;
        let sequence = entries
            .iter()
            .position(|e| e.hash == entry.hash)
            .map_or(entries.len(), |i| i + 1) as u64;
        info!(store = CERTIFICATES, username = %name, hash = %entry.hash, "Certificate accepted");
        Ok(CertificateEntry { pem: pem.to_string(), sequence })
    }

    /// `true` only if the certificate was appended
    pub async fn save(&self, pem: &str) -> bool {
        match self.try_save(pem).await {
            Ok(_) => true,
            Err(e) => {
                ::metrics::counter!(crate::metrics::CERTIFICATES_REJECTED).increment(1);
                warn!(store = CERTIFICATES, "Certificate rejected: {}", e);
                false
            }
        }
    }

    /// Case-insensitive nickname lookup over the accepted view
    pub async fn username_exists(&self, name: &str) -> StoreResult<bool> {
        let wanted = name.to_lowercase();
        let verifier = &self.view.verifier;
        Ok(self
            .view
            .accepted()
            .await?
            .iter()
            .filter_map(|c| verifier.nickname(&c.pem))
            .any(|n| n.to_lowercase() == wanted))
    }

    /// Accepted certificates in log order
    pub async fn certificates(&self) -> StoreResult<Vec<CertificateEntry>> {
        self.view.accepted().await
    }

    /// Raw number of entries in the log, accepted or not
    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self
            .view
            .log
            .entries()
            .await
            .map_err(StoreError::log(CERTIFICATES))?
            .len())
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Push the accepted list now
    pub async fn refresh(&self) {
        self.view.push().await;
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.attachment.shutdown();
        self.view.log.close().await.map_err(StoreError::log(CERTIFICATES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_log::MemoryNetwork;
    use crate::notify::MemorySink;
    use crate::test_utils::{root_pem, user_cert, FakeVerifier};
    use std::time::Duration;

    async fn ledger(sink: Arc<MemorySink>) -> CertificateLedger {
        let network = MemoryNetwork::new();
        let peer = network.peer("a");
        CertificateLedger::open(&peer, Arc::new(FakeVerifier), vec![root_pem("root")], sink)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_valid_certificate() {
        let sink = Arc::new(MemorySink::new());
        let ledger = ledger(sink.clone()).await;

        assert!(ledger.save(&user_cert("alice", "root")).await);
        assert_eq!(ledger.len().await.unwrap(), 1);
        assert!(ledger.username_exists("Alice").await.unwrap());
        assert!(!ledger.username_exists("bob").await.unwrap());

        let pushed = sink
            .wait_for(Duration::from_secs(2), |n| {
                matches!(n, Notification::CertificateListUpdated { certificates } if certificates.len() == 1)
            })
            .await;
        assert!(pushed.is_some());
    }

    #[tokio::test]
    async fn test_bad_chain_is_not_appended() {
        let ledger = ledger(Arc::new(MemorySink::new())).await;
        assert!(!ledger.save(&user_cert("mallory", "other-root")).await);
        assert!(ledger.is_empty().await.unwrap());
        assert!(matches!(
            ledger.try_save(&user_cert("mallory", "other-root")).await,
            Err(StoreError::Verification(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_username_case_insensitive() {
        let ledger = ledger(Arc::new(MemorySink::new())).await;
        assert!(ledger.save(&user_cert("alice", "root")).await);
        assert!(!ledger.save(&user_cert("ALICE", "root")).await);
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_saved_certificate_is_visible_under_any_root() {
        let network = MemoryNetwork::new();
        let peer = network.peer("a");
        let roots = vec![root_pem("root"), root_pem("other-root")];
        let ledger = CertificateLedger::open(
            &peer,
            Arc::new(FakeVerifier),
            roots.clone(),
            Arc::new(MemorySink::new()),
        )
        .await
        .unwrap();
        assert_eq!(ledger.roots(), roots.as_slice());

        assert!(ledger.save(&user_cert("carol", "other-root")).await);
        assert!(ledger.username_exists("carol").await.unwrap());
        let accepted = ledger.certificates().await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].sequence, 1);

        assert!(!ledger.save(&user_cert("dave", "third-root")).await);
        assert!(!ledger.username_exists("dave").await.unwrap());
        assert_eq!(ledger.len().await.unwrap(), 1);
    }
}
