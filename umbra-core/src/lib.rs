//! umbra node core
//!
//! Store orchestration and snapshot-accelerated replication for a group
//! messaging node built on a replicated log primitive.

pub mod config;
pub mod core_log;
pub mod core_snapshot;
pub mod core_store;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod notify;
pub mod test_utils;

pub use config::NodeConfig;
pub use logging::{init_logging, LogLevel};
pub use node::{Backends, CreateOutcome, Node};
pub use notify::{Notification, NotificationSink};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = NodeConfig::new("peer");
    }
}
