/*
    core_snapshot - Snapshot-accelerated replication

    A newly joined peer can skip replaying a message log entry by entry:
    a producer peer publishes the whole log as one content-addressed blob
    and announces it on a small control log next to the store. Consumers
    import the blob into the target log's cache slots and then run the
    log's ordinary load, so the store ends up exactly where incremental
    replication would have left it.
*/

pub mod codec;
pub mod coordinator;
pub mod errors;
pub mod pointer;

pub use coordinator::{ApplyOutcome, SnapshotCoordinator, SnapshotState};
pub use errors::{SyncError, SyncResult};
pub use pointer::{latest_pointer, pointers_for, SnapshotPointer};
