/*
    core_store - Store orchestration

    Everything between the replicated log primitive and the node's
    callers:
    - registry: per-address message stores and their lifecycle
    - directory: put-if-absent replicated maps (channels, threads, users)
    - certificates: the chain-verified certificate ledger
    - wiring: log events to notification pushes
    - model / names: record types and deterministic store names
*/

pub mod certificates;
pub mod directory;
pub mod errors;
pub mod model;
pub mod names;
pub mod registry;
pub mod wiring;

pub use certificates::{CertificateLedger, CertificateVerifier};
pub use directory::{
    ChannelDirectory, ConversationDirectory, DirectMessageUsers, Directory, DirectoryRecord,
    PutOutcome,
};
pub use errors::{StoreError, StoreResult};
pub use model::{
    CertificateEntry, ChannelMessage, ChannelRecord, ConversationRecord, DirectMessage,
    DirectMessagePayload, DirectMessageUser,
};
pub use names::RepoKind;
pub use registry::{Repo, StoreRegistry, SyncStatus};
